//! ELM327 Protocol Selection

use serde::{Deserialize, Serialize};
use std::fmt;

/// OBD-II protocols an ELM327 adapter can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// Get the ELM327 AT command for this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141_2 => "ATSP3",
            ObdProtocol::Iso14230_4Kwp => "ATSP4",
            ObdProtocol::Iso14230_4KwpFast => "ATSP5",
            ObdProtocol::Iso15765_4Can11bit500 => "ATSP6",
            ObdProtocol::Iso15765_4Can29bit500 => "ATSP7",
            ObdProtocol::Iso15765_4Can11bit250 => "ATSP8",
            ObdProtocol::Iso15765_4Can29bit250 => "ATSP9",
        }
    }

    /// Parse the answer to `ATDPN`.
    ///
    /// The adapter prefixes the number with `A` when the protocol was
    /// found by automatic search, e.g. `A6`.
    pub fn from_elm_number(response: &str) -> Option<Self> {
        let number = response.trim().trim_end_matches('>').trim();
        let number = number.strip_prefix('A').unwrap_or(number);
        match number {
            "0" => Some(ObdProtocol::Auto),
            "1" => Some(ObdProtocol::J1850Pwm),
            "2" => Some(ObdProtocol::J1850Vpw),
            "3" => Some(ObdProtocol::Iso9141_2),
            "4" => Some(ObdProtocol::Iso14230_4Kwp),
            "5" => Some(ObdProtocol::Iso14230_4KwpFast),
            "6" => Some(ObdProtocol::Iso15765_4Can11bit500),
            "7" => Some(ObdProtocol::Iso15765_4Can29bit500),
            "8" => Some(ObdProtocol::Iso15765_4Can11bit250),
            "9" => Some(ObdProtocol::Iso15765_4Can29bit250),
            _ => None,
        }
    }

    /// Human readable protocol name
    pub fn description(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "AUTO",
            ObdProtocol::J1850Pwm => "SAE J1850 PWM",
            ObdProtocol::J1850Vpw => "SAE J1850 VPW",
            ObdProtocol::Iso9141_2 => "ISO 9141-2",
            ObdProtocol::Iso14230_4Kwp => "ISO 14230-4 (KWP 5BAUD)",
            ObdProtocol::Iso14230_4KwpFast => "ISO 14230-4 (KWP FAST)",
            ObdProtocol::Iso15765_4Can11bit500 => "ISO 15765-4 (CAN 11/500)",
            ObdProtocol::Iso15765_4Can29bit500 => "ISO 15765-4 (CAN 29/500)",
            ObdProtocol::Iso15765_4Can11bit250 => "ISO 15765-4 (CAN 11/250)",
            ObdProtocol::Iso15765_4Can29bit250 => "ISO 15765-4 (CAN 29/250)",
        }
    }

    /// Check if this is a CAN protocol
    pub fn is_can(&self) -> bool {
        matches!(
            self,
            ObdProtocol::Iso15765_4Can11bit500
                | ObdProtocol::Iso15765_4Can29bit500
                | ObdProtocol::Iso15765_4Can11bit250
                | ObdProtocol::Iso15765_4Can29bit250
        )
    }
}

impl fmt::Display for ObdProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elm_number_parsing() {
        assert_eq!(
            ObdProtocol::from_elm_number("A6"),
            Some(ObdProtocol::Iso15765_4Can11bit500)
        );
        assert_eq!(ObdProtocol::from_elm_number("3"), Some(ObdProtocol::Iso9141_2));
        assert_eq!(ObdProtocol::from_elm_number("?"), None);
    }

    #[test]
    fn test_command_and_number_agree() {
        let protocol = ObdProtocol::Iso15765_4Can29bit250;
        let number = &protocol.to_elm_command()[4..];
        assert_eq!(ObdProtocol::from_elm_number(number), Some(protocol));
        assert!(protocol.is_can());
    }
}
