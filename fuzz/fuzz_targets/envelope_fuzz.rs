#![no_main]
use libfuzzer_sys::fuzz_target;
use siege_proxy::{
    block::decode_block_param,
    envelope::RpcEnvelope,
};

// Whatever the body, decoding must either fail cleanly or yield an envelope
// whose first param can be fed to the block decoder without panicking.
fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = RpcEnvelope::decode(data) {
        if let Some(param) = envelope.first_param() {
            let _ = decode_block_param(param);
        }
    }
});
