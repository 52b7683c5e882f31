//! PostgreSQL wire protocol constants
//!
//! Message type bytes, startup request codes, and the OIDs the observer
//! knows by name.

/// Smallest typed frame: 1-byte type + 4-byte big-endian length.
pub const MIN_PACKET_LEN: usize = 5;

/// Parse ('P', frontend)
pub const MSG_PARSE: u8 = b'P';

/// Bind ('B', frontend)
pub const MSG_BIND: u8 = b'B';

/// ErrorResponse ('E', backend)
pub const MSG_ERROR_RESPONSE: u8 = b'E';

/// CommandComplete ('C', backend)
pub const MSG_COMMAND_COMPLETE: u8 = b'C';

/// ErrorResponse field tag carrying the primary human-readable message
pub const FIELD_MESSAGE: u8 = b'M';

/// StartupMessage protocol version 3.0
pub const PROTOCOL_VERSION_3: u32 = 196608;

/// SSLRequest magic number
pub const SSL_REQUEST_CODE: u32 = (1234 << 16) | 5679; // 80877103

/// CancelRequest magic number
pub const CANCEL_REQUEST_CODE: u32 = (1234 << 16) | 5678; // 80877102

/// Bind parameter format: text
#[allow(dead_code)]
pub const FORMAT_TEXT: u16 = 0;

/// Bind parameter format: binary
#[allow(dead_code)]
pub const FORMAT_BINARY: u16 = 1;

/// OIDs known by name; every other OID is kept as its number
#[allow(dead_code)]
pub const OID_INT8: u32 = 20;
#[allow(dead_code)]
pub const OID_FLOAT8: u32 = 701;
#[allow(dead_code)]
pub const OID_JSONB: u32 = 3802;
