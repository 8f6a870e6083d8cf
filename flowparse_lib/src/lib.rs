pub mod error;
pub mod fields;
pub mod flowsets;
pub mod parser;
pub mod records;
pub mod settings;
pub mod templates;
pub mod time;
pub mod utils;
pub mod v5;

pub use crate::error::{DecodeError, FlowSetIssue, SettingsError};
pub use crate::parser::{DecodeReport, NetflowParser, ParserStats};
pub use crate::records::{EventTime, FlowRecord, FlowValue};
pub use crate::settings::ParserSettings;


/////////////////////////////////////////////
//// EXAMPLE OF DECODING PACKETS IN YOUR CODE
////
//
// let settings = ParserSettings::load_or_create("flowparse.json")?;
// let mut parser = NetflowParser::new(&settings)?;
//
// let socket = UdpSocket::bind("0.0.0.0:2055")?;
// let mut buf = [0u8; 65535];
// loop {
//     let (byte_count, source) = socket.recv_from(&mut buf)?;
//     let result = parser.decode_from(Some(source.ip()), &buf[..byte_count], |time, record| {
//         println!("{time} {}", serde_json::to_string(&record).unwrap_or_default());
//     });
//     if let Err(e) = result {
//         log::warn!("dropping packet from {source}: {e}");
//     }
// }
//
/////////////////////////////////////////////
//// templates are cached per exporter address, so keep one parser for
//// every packet of a given exporter
/////////////////////////////////////////////
