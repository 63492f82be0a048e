//! Mixer payload-level error codes (§7 "Payload-level", 421-435 for
//! Mixer — actually the full 405-435 range this package can return).
//!
//! Grounded verbatim on `MixerMessage::error(code, body)` in
//! `MixerPackage.cxx`: every reason string below is adopted as-is so wire
//! output stays byte-compatible with the original deployment's clients
//! (SPEC_FULL §C).

/// A package-level result code, carried in the `<response status=…>`
/// element of a `200` REPORT body (the CFW transaction itself always
/// completes with `200`; this is the *application* result).
pub type MixerStatus = u16;

pub const OK: MixerStatus = 200;
pub const SYNTAX_ERROR: MixerStatus = 400;
pub const CONFERENCE_ALREADY_EXISTS: MixerStatus = 405;
pub const CONFERENCE_NOT_FOUND: MixerStatus = 406;
pub const INCOMPATIBLE_STREAM_CONFIG: MixerStatus = 407;
pub const ALREADY_JOINED: MixerStatus = 408;
pub const NOT_JOINED: MixerStatus = 409;
pub const CONFERENCE_FULL: MixerStatus = 410;
pub const UNABLE_TO_JOIN: MixerStatus = 411;
pub const CONNECTION_NOT_FOUND: MixerStatus = 412;
pub const OTHER_EXECUTION_ERROR: MixerStatus = 419;
pub const CONFERENCE_RESERVATION_FAILED: MixerStatus = 420;
pub const UNABLE_TO_CONFIGURE_AUDIO_MIX: MixerStatus = 421;
pub const UNSUPPORTED_STREAM_CONFIG: MixerStatus = 422;
pub const MIXING_CONNECTIONS_NOT_SUPPORTED: MixerStatus = 426;
pub const MIXING_CONFERENCES_NOT_SUPPORTED: MixerStatus = 427;
pub const UNSUPPORTED_FOREIGN_ATTRIBUTE: MixerStatus = 428;
pub const OTHER_UNSUPPORTED_CAPABILITY: MixerStatus = 435;
pub const FORBIDDEN: MixerStatus = 403;

/// Canonical reason string for a code, matching `MixerMessage::error`'s
/// switch statement.
pub fn reason_for(code: MixerStatus) -> &'static str {
    match code {
        200 => "OK",
        400 => "Syntax error",
        403 => "Forbidden",
        405 => "Conference already exists",
        406 => "Conference does not exist",
        407 => "Incompatible stream configuration",
        408 => "joining entities already joined",
        409 => "joining entities not joined",
        410 => "Unable to join - conference full",
        411 => "Unable to perform join mixer operation",
        412 => "Connection does not exist",
        419 => "Other execution error",
        420 => "Conference reservation failed",
        421 => "Unable to configure audio mix",
        422 => "Unsupported media stream configuration",
        426 => "Unable to join - mixing connections not supported",
        427 => "Unable to join - mixing conferences not supported",
        428 => "Unsupported foreign namespace attribute or element",
        435 => "Other unsupported capability",
        _ => "Other error",
    }
}
