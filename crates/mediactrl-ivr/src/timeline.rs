//! Compiles a `<prompt>` tree (§4.8 "Prompt semantics") into a single flat
//! frame track the playback tick can step through one 20 ms frame at a
//! time.
//!
//! URIs are gathered and fetched up front (one [`PromptCache::fetch`] per
//! distinct URI, so a `<media>` referenced twice in one prompt only
//! downloads once), then the tree is folded into frames synchronously:
//! `<seq>` concatenates, `<par>` sums its children via
//! [`MixAccumulator`] and stops at the shortest (`endsync="first"`) or
//! longest (`endsync="last"`) child.

use std::collections::HashMap;
use std::sync::Arc;

use mediactrl_media::mixing::MixAccumulator;
use mediactrl_media::prompt::{Prompt, PromptCache};
use mediactrl_media::types::{AudioFrame, FrameOwner, SAMPLES_PER_FRAME};

use crate::error;
use crate::xml::{EndSync, PromptNode, PromptSpec};

pub type TimelineError = (error::IvrStatus, String);

fn collect_uris(node: &PromptNode, uris: &mut Vec<String>) {
    match node {
        PromptNode::Media(item) => {
            if !uris.contains(&item.loc) {
                uris.push(item.loc.clone());
            }
        }
        PromptNode::Variable(_) => {}
        PromptNode::Seq(children) => children.iter().for_each(|c| collect_uris(c, uris)),
        PromptNode::Par(children, _) => children.iter().for_each(|c| collect_uris(c, uris)),
    }
}

fn combine(node: &PromptNode, prompts: &HashMap<String, Arc<Prompt>>) -> Vec<AudioFrame> {
    match node {
        PromptNode::Media(item) => {
            let Some(prompt) = prompts.get(&item.loc) else {
                return Vec::new();
            };
            let mut frames: Vec<AudioFrame> = prompt.frames.iter().cloned().collect();
            let begin_frames = item.clip_begin_ms.map(|ms| (ms / 20) as usize).unwrap_or(0);
            if begin_frames >= frames.len() {
                return Vec::new();
            }
            if begin_frames > 0 {
                frames.drain(..begin_frames);
            }
            if let Some(end_ms) = item.clip_end_ms {
                let end_frames = (end_ms / 20) as usize;
                frames.truncate(end_frames.saturating_sub(begin_frames));
            }
            frames
        }
        // TTS variable substitution has no synthesizer in this stack;
        // a <variable> contributes no audio.
        PromptNode::Variable(_) => Vec::new(),
        PromptNode::Seq(children) => children.iter().flat_map(|c| combine(c, prompts)).collect(),
        PromptNode::Par(children, endsync) => {
            let tracks: Vec<Vec<AudioFrame>> = children.iter().map(|c| combine(c, prompts)).collect();
            mix_tracks(&tracks, *endsync)
        }
    }
}

fn mix_tracks(tracks: &[Vec<AudioFrame>], endsync: EndSync) -> Vec<AudioFrame> {
    let len = match endsync {
        EndSync::First => tracks.iter().map(|t| t.len()).min().unwrap_or(0),
        EndSync::Last => tracks.iter().map(|t| t.len()).max().unwrap_or(0),
    };
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let mut acc = MixAccumulator::new();
        for track in tracks {
            if let Some(frame) = track.get(i) {
                let mut samples = [0i16; SAMPLES_PER_FRAME];
                let n = frame.samples().len().min(SAMPLES_PER_FRAME);
                samples[..n].copy_from_slice(&frame.samples()[..n]);
                acc.add(&samples, 100);
            }
        }
        out.push(AudioFrame::new(acc.clip().to_vec(), 8000, FrameOwner::Prompt));
    }
    out
}

/// Fetches every `<media>` URI in `spec` and folds the tree into one flat
/// frame track.
pub async fn compile(cache: &PromptCache, spec: &PromptSpec) -> Result<Vec<AudioFrame>, TimelineError> {
    let mut uris = Vec::new();
    collect_uris(&spec.root, &mut uris);

    let mut prompts = HashMap::new();
    for uri in uris {
        let prompt = cache
            .fetch(&uri)
            .await
            .map_err(|e| (error::OTHER_EXECUTION_ERROR, format!("fetching {uri}: {e}")))?;
        prompts.insert(uri, prompt);
    }

    Ok(combine(&spec.root, &prompts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::MediaItem;

    fn frame_with(value: i16) -> AudioFrame {
        AudioFrame::new(vec![value; SAMPLES_PER_FRAME], 8000, FrameOwner::Prompt)
    }

    #[test]
    fn seq_concatenates_tracks() {
        let a = vec![frame_with(1), frame_with(2)];
        let b = vec![frame_with(3)];
        let mut prompts = HashMap::new();
        prompts.insert("a".to_string(), Arc::new(Prompt { uri: "a".into(), frames: Arc::new(a) }));
        prompts.insert("b".to_string(), Arc::new(Prompt { uri: "b".into(), frames: Arc::new(b) }));
        let node = PromptNode::Seq(vec![
            PromptNode::Media(MediaItem { loc: "a".into(), clip_begin_ms: None, clip_end_ms: None, sound_level: None }),
            PromptNode::Media(MediaItem { loc: "b".into(), clip_begin_ms: None, clip_end_ms: None, sound_level: None }),
        ]);
        let out = combine(&node, &prompts);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn par_first_endsync_stops_at_shortest_track() {
        let a = vec![frame_with(10), frame_with(10), frame_with(10)];
        let b = vec![frame_with(20)];
        let mut prompts = HashMap::new();
        prompts.insert("a".to_string(), Arc::new(Prompt { uri: "a".into(), frames: Arc::new(a) }));
        prompts.insert("b".to_string(), Arc::new(Prompt { uri: "b".into(), frames: Arc::new(b) }));
        let node = PromptNode::Par(
            vec![
                PromptNode::Media(MediaItem { loc: "a".into(), clip_begin_ms: None, clip_end_ms: None, sound_level: None }),
                PromptNode::Media(MediaItem { loc: "b".into(), clip_begin_ms: None, clip_end_ms: None, sound_level: None }),
            ],
            EndSync::First,
        );
        let out = combine(&node, &prompts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].samples()[0], 30);
    }

    #[test]
    fn clip_begin_skips_leading_frames() {
        let a = vec![frame_with(1), frame_with(2), frame_with(3)];
        let mut prompts = HashMap::new();
        prompts.insert("a".to_string(), Arc::new(Prompt { uri: "a".into(), frames: Arc::new(a) }));
        let node = PromptNode::Media(MediaItem { loc: "a".into(), clip_begin_ms: Some(40), clip_end_ms: None, sound_level: None });
        let out = combine(&node, &prompts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].samples()[0], 3);
    }
}
