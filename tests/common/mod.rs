pub mod gateway_mock;
pub mod ws_mock;
