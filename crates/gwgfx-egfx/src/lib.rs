/// EGFX dynamic virtual channel name per MS-RDPEGFX
pub const CHANNEL_NAME: &str = "Microsoft::Windows::RDS::Graphics";

#[macro_use]
mod macros;

pub mod client;
pub mod codec;
pub mod decode;
pub mod pdu;
pub mod surface_bank;
