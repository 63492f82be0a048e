//! IVR payload-level error codes (§7, 405-439) and `dialogexit` status
//! codes (§4.8).
//!
//! Grounded verbatim on `IvrMessage::error(code)`'s switch statement in
//! `IvrPackage.cxx`: every reason string is adopted as-is (SPEC_FULL §C).

pub type IvrStatus = u16;

pub const OK: IvrStatus = 200;
pub const SYNTAX_ERROR: IvrStatus = 400;
pub const DIALOG_ALREADY_EXISTS: IvrStatus = 405;
pub const DIALOG_NOT_FOUND: IvrStatus = 406;
pub const CONNECTION_NOT_FOUND: IvrStatus = 407;
pub const CONFERENCE_NOT_FOUND: IvrStatus = 408;
pub const RESOURCE_UNAVAILABLE: IvrStatus = 409;
pub const DIALOG_CANCELED: IvrStatus = 410;
pub const INCOMPATIBLE_STREAM_CONFIG: IvrStatus = 411;
pub const MEDIA_STREAM_UNAVAILABLE: IvrStatus = 412;
pub const DUPLICATE_CONTROL_KEYS: IvrStatus = 413;
pub const OTHER_EXECUTION_ERROR: IvrStatus = 419;
pub const UNSUPPORTED_URI_SCHEME: IvrStatus = 420;
pub const UNSUPPORTED_LANGUAGE: IvrStatus = 421;
pub const UNSUPPORTED_PLAYBACK_FORMAT: IvrStatus = 422;
pub const UNSUPPORTED_RECORD_FORMAT: IvrStatus = 423;
pub const UNSUPPORTED_GRAMMAR_FORMAT: IvrStatus = 424;
pub const UNSUPPORTED_VARIABLE_CONFIG: IvrStatus = 425;
pub const UNSUPPORTED_DTMF_CONFIG: IvrStatus = 426;
pub const UNSUPPORTED_PARAMETER: IvrStatus = 427;
pub const UNSUPPORTED_STREAM_CONFIG: IvrStatus = 428;
pub const UNSUPPORTED_PLAYBACK_CONFIG: IvrStatus = 429;
pub const UNSUPPORTED_RECORD_CONFIG: IvrStatus = 430;
pub const UNSUPPORTED_FOREIGN_ATTRIBUTE: IvrStatus = 431;
pub const UNSUPPORTED_MULTIPLE_DIALOG: IvrStatus = 432;
pub const UNSUPPORTED_COLLECT_AND_RECORD: IvrStatus = 433;
pub const UNSUPPORTED_VAD: IvrStatus = 434;
pub const UNSUPPORTED_PARALLEL_PLAYBACK: IvrStatus = 435;
pub const OTHER_UNSUPPORTED_CAPABILITY: IvrStatus = 439;
pub const FORBIDDEN: IvrStatus = 403;

pub fn reason_for(code: IvrStatus) -> &'static str {
    match code {
        200 => "OK",
        400 => "Syntax error",
        403 => "Forbidden",
        405 => "dialogid already exists",
        406 => "dialogid does not exist",
        407 => "connectionid does not exist",
        408 => "conferenceid does not exist",
        409 => "Resource cannot be retrieved",
        410 => "Dialog execution canceled",
        411 => "Incompatible stream configuration",
        412 => "Media stream not available",
        413 => "Control keys with same value",
        419 => "Other execution error",
        420 => "Unsupported URI scheme",
        421 => "Unsupported dialog language",
        422 => "Unsupported playback format",
        423 => "Unsupported record format",
        424 => "Unsupported grammar format",
        425 => "Unsupported variable configuration",
        426 => "Unsupported DTMF configuration",
        427 => "Unsupported parameter",
        428 => "Unsupported media stream configuration",
        429 => "Unsupported playback configuration",
        430 => "Unsupported record configuration",
        431 => "Unsupported foreign namespace attribute or element",
        432 => "Unsupported multiple dialog capability",
        433 => "Unsupported collect and record configuration",
        434 => "Unsupported VAD capability",
        435 => "Unsupported parallel playback",
        439 => "Other unsupported capability",
        _ => "Other error",
    }
}

/// `dialogexit` status codes (§4.8).
pub mod exit_status {
    pub const DIALOG_TERMINATE: u16 = 0;
    pub const SUCCESS: u16 = 1;
    pub const CONNECTION_TERMINATED: u16 = 2;
    pub const MAX_DURATION: u16 = 3;
    pub const EXECUTION_ERROR: u16 = 4;
}

pub fn exit_reason_for(status: u16) -> &'static str {
    match status {
        0 => "Dialog terminated",
        1 => "Dialog exited normally",
        2 => "Connection terminated",
        3 => "Max duration exceeded",
        4 => "Execution error",
        _ => "Unknown",
    }
}
