#![no_main]
use alloy_primitives::hex;
use libfuzzer_sys::fuzz_target;
use siege_proxy::block::{
    decode_block,
    decode_block_param,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(block) = decode_block(data) {
        // A decodable block must also decode through the hex param path.
        let param = serde_json::Value::String(format!("0x{}", hex::encode(data)));
        let via_param = decode_block_param(&param).expect("hex round trip of a valid block");
        assert_eq!(block, via_param);
    }
});

