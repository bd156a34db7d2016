//! Message type tags.
//!
//! Every frame's `msg_type` byte is one of the ASCII letters below. The
//! client→server set is upper-case (`A..U`), the server→client set is
//! lower-case (`a..r`); the letter itself carries no meaning beyond
//! "this is the Nth tag in each direction" — named constants are what code
//! should read and write.

use crate::errors::ProtocolError;

/// Direction a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → server request.
    Request,
    /// Server → client response or unsolicited message.
    Response,
}

macro_rules! message_type {
    (
        request { $($rname:ident = $rbyte:literal),+ $(,)? }
        response { $($sname:ident = $sbyte:literal),+ $(,)? }
    ) => {
        /// Message type tag, the first byte of every frame.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum MessageType {
            $(#[allow(missing_docs)] $rname,)+
            $(#[allow(missing_docs)] $sname,)+
        }

        impl MessageType {
            /// Encode as the wire byte.
            #[must_use]
            pub const fn to_u8(self) -> u8 {
                match self {
                    $(Self::$rname => $rbyte,)+
                    $(Self::$sname => $sbyte,)+
                }
            }

            /// Decode from a wire byte. `None` if unrecognized.
            #[must_use]
            pub const fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($rbyte => Some(Self::$rname),)+
                    $($sbyte => Some(Self::$sname),)+
                    _ => None,
                }
            }

            /// Decode from a wire byte, or a typed error.
            pub fn try_from_u8(byte: u8) -> Result<Self, ProtocolError> {
                Self::from_u8(byte).ok_or(ProtocolError::UnknownMessageType(byte))
            }

            /// Which direction this message type travels.
            #[must_use]
            pub const fn direction(self) -> Direction {
                match self {
                    $(Self::$rname => Direction::Request,)+
                    $(Self::$sname => Direction::Response,)+
                }
            }
        }
    };
}

message_type! {
    request {
        InstanceLookup    = b'A',
        AddReference      = b'B',
        DropReferences    = b'C',
        TypeRequest       = b'D',
        MethodCall        = b'E',
        ToString          = b'F',
        GetField          = b'G',
        SetField          = b'H',
        ArrayLength       = b'I',
        NewArray          = b'J',
        Cast              = b'K',
        Lock              = b'L',
        Unlock            = b'M',
        InjectClass       = b'N',
        GetValueOf        = b'O',
        GetCallbackHandle = b'P',
        CallbackResponse  = b'Q',
        GetProxy          = b'R',
        InvokeAndGetObject = b'S',
        InjectSource      = b'T',
        ReplaceClass      = b'U',
    }
    response {
        ObjectReference   = b'a',
        TypeDescription   = b'b',
        ArbitraryItem     = b'c',
        Exception         = b'd',
        AsciiValue        = b'e',
        Utf16Value        = b'f',
        PickleBytes       = b'g',
        EmptyAck          = b'h',
        ArrayLengthReply  = b'i',
        PythonReference   = b'j',
        Callback          = b'k',
        EvalOrExec        = b'l',
        PythonInvoke      = b'm',
        ObjectCallback    = b'n',
        GetObject         = b'o',
        GetAttr           = b'p',
        SetGlobal         = b'q',
        ShmBytes          = b'r',
    }
}

/// Request id reserved for unsolicited server→client messages (spec.md
/// §3: "the id −1 is reserved and never allocated" for outbound requests).
pub const UNSOLICITED_REQUEST_ID: i32 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_tag() {
        for byte in 0u8..=255 {
            if let Some(mt) = MessageType::from_u8(byte) {
                assert_eq!(mt.to_u8(), byte);
            }
        }
    }

    #[test]
    fn request_tags_are_upper_case_and_response_lower_case() {
        assert_eq!(MessageType::InstanceLookup.direction(), Direction::Request);
        assert_eq!(MessageType::ReplaceClass.direction(), Direction::Request);
        assert_eq!(MessageType::ObjectReference.direction(), Direction::Response);
        assert_eq!(MessageType::ShmBytes.direction(), Direction::Response);
    }

    #[test]
    fn unknown_byte_is_an_error() {
        assert_eq!(MessageType::try_from_u8(0x00), Err(ProtocolError::UnknownMessageType(0x00)));
    }
}
