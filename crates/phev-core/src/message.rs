//! Device protocol messages as seen by the gateway

use crate::register::RegisterValue;

/// Classification of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Register report from the vehicle
    Response,
    /// Frame that failed to decode (bad XOR or framing)
    BadEncoding,
    /// Anything else (pings, handshake chatter)
    Other,
}

/// Request/acknowledge flag carried on every protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckFlag {
    Request,
    Ack,
}

/// Inbound message from the device client
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMessage {
    pub kind: MessageKind,
    pub register: u8,
    pub ack: AckFlag,
    /// XOR parity byte of the frame, echoed in the acknowledgement
    pub xor: u8,
    /// Raw register payload
    pub data: Vec<u8>,
    /// Decoded register value, if the device client recognised the register
    pub value: Option<RegisterValue>,
}

impl DeviceMessage {
    /// A register report awaiting acknowledgement
    pub fn response(register: u8, data: Vec<u8>, value: Option<RegisterValue>) -> Self {
        Self {
            kind: MessageKind::Response,
            register,
            ack: AckFlag::Request,
            xor: 0,
            data,
            value,
        }
    }

    pub fn bad_encoding() -> Self {
        Self {
            kind: MessageKind::BadEncoding,
            register: 0,
            ack: AckFlag::Request,
            xor: 0,
            data: Vec::new(),
            value: None,
        }
    }

    pub fn with_xor(mut self, xor: u8) -> Self {
        self.xor = xor;
        self
    }

    pub fn with_ack(mut self, ack: AckFlag) -> Self {
        self.ack = ack;
        self
    }

    /// The acknowledgement the vehicle expects for this message.
    ///
    /// Echoes register and parity with a single zero byte payload.
    pub fn acknowledgement(&self) -> OutboundMessage {
        OutboundMessage {
            register: self.register,
            ack: AckFlag::Ack,
            xor: self.xor,
            data: vec![0x00],
        }
    }
}

/// Outbound protocol message handed to the device client's send channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub register: u8,
    pub ack: AckFlag,
    pub xor: u8,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgement_echoes_register_and_parity() {
        let msg = DeviceMessage::response(0x1d, vec![0x12, 0x34], None).with_xor(0x5a);
        let ack = msg.acknowledgement();

        assert_eq!(ack.register, 0x1d);
        assert_eq!(ack.xor, 0x5a);
        assert_eq!(ack.ack, AckFlag::Ack);
        assert_eq!(ack.data, vec![0x00]);
    }
}
