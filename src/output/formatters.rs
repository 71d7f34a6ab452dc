use chrono::{DateTime, Local};
use serde_json::json;

use crate::config::{DisplayConfig, OutputFormat};
use crate::modbus::session::{ConnectionState, ReceivedData, SessionEvent};
use crate::utils::error::DecodeError;
use crate::utils::hexdump::to_hex_string;

/// Turns session events into text for the terminal.
///
/// Returning `None` hides the event.
pub trait EventFormatter: Send + Sync {
    fn format_event(&self, event: &SessionEvent) -> Option<String>;

    fn format_header(&self) -> String {
        String::new()
    }
}

pub fn formatter_for(display: &DisplayConfig) -> Box<dyn EventFormatter> {
    match display.format {
        OutputFormat::Console => Box::new(ConsoleFormatter {
            display_as_hex: display.display_as_hex,
            show_sent_frames: display.show_sent_frames,
        }),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn stamp(at: DateTime<Local>) -> String {
    format!("[{}]", at.format("%H:%M:%S"))
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleFormatter {
    pub display_as_hex: bool,
    pub show_sent_frames: bool,
}

impl ConsoleFormatter {
    fn format_received(&self, data: &ReceivedData) -> String {
        let prefix = stamp(data.received_at);
        let raw_line = || {
            format!(
                "{} received ({} bytes): {}",
                prefix,
                data.raw.len(),
                to_hex_string(&data.raw)
            )
        };

        if self.display_as_hex {
            return raw_line();
        }

        match &data.outcome {
            Ok(value) => format!("{} {}", prefix, value),
            Err(DecodeError::NoData) => format!("{} no data", prefix),
            Err(fault @ DecodeError::ModbusFault { .. }) => format!("{} {}", prefix, fault),
            // Frames that cannot be interpreted are shown as they arrived.
            Err(_) => raw_line(),
        }
    }
}

impl EventFormatter for ConsoleFormatter {
    fn format_event(&self, event: &SessionEvent) -> Option<String> {
        let now = stamp(Local::now());
        match event {
            SessionEvent::ConnectionStateChanged(state) => match state {
                ConnectionState::Connected => Some(format!("{} connected", now)),
                ConnectionState::Disconnected => Some(format!("{} disconnected", now)),
                ConnectionState::Connecting | ConnectionState::Disconnecting => None,
            },
            SessionEvent::RequestSent {
                transaction_id,
                request,
                frame,
            } => {
                let mut line = format!(
                    "{} sent read #{} (address: {}, type: {})",
                    now, transaction_id, request.address, request.data_type
                );
                if self.show_sent_frames {
                    line.push_str(&format!("\n           {}", to_hex_string(frame)));
                }
                Some(line)
            }
            SessionEvent::DataReceived(data) => Some(self.format_received(data)),
            SessionEvent::ResponseTimeout {
                transaction_id,
                request,
            } => Some(format!(
                "{} no response to read #{} ({})",
                now, transaction_id, request
            )),
            SessionEvent::ReceiveFailed(message) => {
                Some(format!("{} receive error: {}", now, message))
            }
        }
    }

    fn format_header(&self) -> String {
        format!(
            "🚀 Modbus TCP console - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// One JSON object per line.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter;

impl EventFormatter for JsonFormatter {
    fn format_event(&self, event: &SessionEvent) -> Option<String> {
        let timestamp = Local::now().to_rfc3339();
        let value = match event {
            SessionEvent::ConnectionStateChanged(state) => json!({
                "event": "state",
                "timestamp": timestamp,
                "state": state,
            }),
            SessionEvent::RequestSent {
                transaction_id,
                request,
                frame,
            } => json!({
                "event": "request_sent",
                "timestamp": timestamp,
                "transaction_id": transaction_id,
                "address": request.address,
                "data_type": request.data_type,
                "frame": to_hex_string(frame),
            }),
            SessionEvent::DataReceived(data) => {
                let (value, error) = match &data.outcome {
                    Ok(v) => (serde_json::to_value(v).unwrap_or_default(), None),
                    Err(e) => (serde_json::Value::Null, Some(e.to_string())),
                };
                json!({
                    "event": "data",
                    "timestamp": data.received_at.to_rfc3339(),
                    "sequence": data.sequence,
                    "requested": data.requested,
                    "raw": to_hex_string(&data.raw),
                    "value": value,
                    "error": error,
                })
            }
            SessionEvent::ResponseTimeout {
                transaction_id,
                request,
            } => json!({
                "event": "response_timeout",
                "timestamp": timestamp,
                "transaction_id": transaction_id,
                "address": request.address,
                "data_type": request.data_type,
            }),
            SessionEvent::ReceiveFailed(message) => json!({
                "event": "receive_failed",
                "timestamp": timestamp,
                "error": message,
            }),
        };
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::decoder::DecodedValue;
    use crate::modbus::encoder::encode;
    use crate::modbus::protocol::{DataType, ReadRequest};
    use bytes::Bytes;

    fn received(outcome: Result<DecodedValue, DecodeError>) -> SessionEvent {
        SessionEvent::DataReceived(ReceivedData {
            sequence: 3,
            received_at: Local::now(),
            requested: Some(DataType::Int),
            raw: Bytes::from_static(&[0x00, 0x01, 0x00, 0x00]),
            outcome,
        })
    }

    #[test]
    fn test_console_shows_decoded_value() {
        let formatter = ConsoleFormatter::default();
        let line = formatter
            .format_event(&received(Ok(DecodedValue::Int(5))))
            .unwrap();
        assert!(line.ends_with("[int] value: 5"), "{}", line);
    }

    #[test]
    fn test_console_hex_mode_shows_raw() {
        let formatter = ConsoleFormatter {
            display_as_hex: true,
            show_sent_frames: false,
        };
        let line = formatter
            .format_event(&received(Ok(DecodedValue::Int(5))))
            .unwrap();
        assert!(line.ends_with("received (4 bytes): 00 01 00 00"), "{}", line);
    }

    #[test]
    fn test_console_undecodable_shows_raw() {
        let formatter = ConsoleFormatter::default();
        let line = formatter
            .format_event(&received(Err(DecodeError::TooShort { len: 4 })))
            .unwrap();
        assert!(line.contains("00 01 00 00"), "{}", line);
    }

    #[test]
    fn test_console_sent_frame_echo() {
        let formatter = ConsoleFormatter {
            display_as_hex: false,
            show_sent_frames: true,
        };
        let event = SessionEvent::RequestSent {
            transaction_id: 1,
            request: ReadRequest::new(100, DataType::Int),
            frame: encode(1, 100, DataType::Int),
        };
        let text = formatter.format_event(&event).unwrap();
        assert!(text.contains("address: 100, type: int"));
        assert!(text.contains("00 01 00 00 00 06 01 03 00 64 00 02"));
    }

    #[test]
    fn test_console_hides_transient_states() {
        let formatter = ConsoleFormatter::default();
        let event = SessionEvent::ConnectionStateChanged(ConnectionState::Connecting);
        assert!(formatter.format_event(&event).is_none());
    }

    #[test]
    fn test_json_data_event() {
        let line = JsonFormatter
            .format_event(&received(Ok(DecodedValue::Float(1.5))))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "data");
        assert_eq!(value["sequence"], 3);
        assert_eq!(value["requested"], "int");
        assert_eq!(value["value"]["type"], "float");
        assert_eq!(value["value"]["value"], 1.5);
        assert!(value["error"].is_null());
    }

    #[test]
    fn test_json_fault_event() {
        let line = JsonFormatter
            .format_event(&received(Err(DecodeError::NoData)))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(value["value"].is_null());
        assert_eq!(value["error"], "response carries no data");
    }
}
