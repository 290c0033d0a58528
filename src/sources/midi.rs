//! Standard MIDI files served from arbitrary URLs. Unlike every other source the payload
//! is transformed: the file is rendered to a mono 16-bit WAV before it reaches the host.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use hound::{SampleFormat, WavSpec, WavWriter};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use url::Url;

use super::{
    ResolutionResult, SourceError, SourceProvider, SourceResult, StreamKind, StreamOutput, TrackInfo,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::ensure_success;

const MIDI_CONTENT_TYPE: &str = "audio/midi";
/// The player consumes 48 kHz; rendering at twice that plays back at the right speed.
pub const SAMPLE_RATE: u32 = 48_000 * 2;
/// Microseconds per quarter note until the file sets a tempo (120 bpm).
const DEFAULT_TEMPO: u32 = 500_000;
const RELEASE_SECONDS: f64 = 0.05;
const ATTACK_SECONDS: f64 = 0.005;
const NOTE_GAIN: f32 = 0.2;
/// The finished WAV is held in memory until the host takes it; about six minutes of audio.
const MAX_WAV_BYTES: u64 = 64 * 1024 * 1024;
/// Samples mixed at a time before being written out.
const BLOCK_SAMPLES: usize = 48_000;

/// Builds the entry for a fetched URL based on its content type.
pub fn process_unknown(url: &str, content_type: Option<&str>) -> ResolutionResult {
    let is_midi = content_type
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(MIDI_CONTENT_TYPE));
    if !is_midi {
        return ResolutionResult::empty();
    }

    ResolutionResult::tracks(vec![TrackInfo {
        title: "Unknown track".to_string(),
        author: "Unknown author".to_string(),
        identifier: url.to_string(),
        uri: url.to_string(),
        length: 0,
        is_stream: true,
    }])
}

#[derive(Debug, Clone, Copy)]
enum NoteEvent {
    Tempo(u32),
    On { channel: u8, key: u8, velocity: u8 },
    Off { channel: u8, key: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Note {
    start: f64,
    end: f64,
    key: u8,
    velocity: u8,
}

/// Flattens every track into `(absolute tick, event)` pairs sorted by tick.
fn timeline(smf: &Smf) -> Vec<(u64, NoteEvent)> {
    let mut events = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += u64::from(event.delta.as_int());
            let note = match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => NoteEvent::Tempo(tempo.as_int()),
                TrackEventKind::Midi { channel, message } => match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => NoteEvent::On {
                        channel: channel.as_int(),
                        key: key.as_int(),
                        velocity: vel.as_int(),
                    },
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => NoteEvent::Off {
                        channel: channel.as_int(),
                        key: key.as_int(),
                    },
                    _ => continue,
                },
                _ => continue,
            };
            events.push((tick, note));
        }
    }
    events.sort_by_key(|&(tick, _)| tick);
    events
}

/// Converts the timeline to notes with start and end times in seconds.
fn collect_notes(smf: &Smf) -> Vec<Note> {
    let mut tempo = DEFAULT_TEMPO;
    let elapsed = |ticks: u64, tempo: u32| match smf.header.timing {
        Timing::Metrical(ticks_per_beat) => {
            ticks as f64 * f64::from(tempo) / (1_000_000.0 * f64::from(ticks_per_beat.as_int().max(1)))
        }
        Timing::Timecode(fps, subframes) => ticks as f64 / (f64::from(fps.as_f32()) * f64::from(subframes.max(1))),
    };

    let mut notes = Vec::new();
    let mut held: HashMap<(u8, u8), Vec<(f64, u8)>> = HashMap::new();
    let (mut last_tick, mut now) = (0u64, 0.0f64);

    for (tick, event) in timeline(smf) {
        now += elapsed(tick - last_tick, tempo);
        last_tick = tick;
        match event {
            NoteEvent::Tempo(value) => tempo = value,
            NoteEvent::On { channel, key, velocity } => held.entry((channel, key)).or_default().push((now, velocity)),
            NoteEvent::Off { channel, key } => {
                if let Some((start, velocity)) = held.get_mut(&(channel, key)).and_then(Vec::pop) {
                    notes.push(Note { start, end: now, key, velocity });
                }
            }
        }
    }

    // Notes never released stop with the last event.
    for ((_, key), starts) in held {
        notes.extend(starts.into_iter().map(|(start, velocity)| Note { start, end: now, key, velocity }));
    }
    notes.sort_by(|a, b| a.start.total_cmp(&b.start));
    notes
}

fn frequency(key: u8) -> f32 {
    440.0 * 2f32.powf((f32::from(key) - 69.0) / 12.0)
}

/// Length of the render in samples, rejecting renders whose WAV would not fit the budget.
fn sample_count(notes: &[Note], sample_rate: u32) -> SourceResult<usize> {
    let end = notes.iter().map(|n| n.end).fold(0.0f64, f64::max) + RELEASE_SECONDS;
    let samples = (end * f64::from(sample_rate)).ceil() as u64;
    if samples * 2 > MAX_WAV_BYTES {
        return Err(SourceError::Decode(format!("MIDI file is too long to render ({:.0}s)", end)));
    }
    Ok(samples as usize)
}

/// Mixes every note as an enveloped sine wave, handing `emit` one block of PCM at a time.
/// `notes` must be sorted by start.
fn synthesize<F>(notes: &[Note], sample_rate: u32, total: usize, mut emit: F) -> SourceResult<()>
where
    F: FnMut(&[i16]) -> SourceResult<()>,
{
    let rate = f64::from(sample_rate);
    let release = (RELEASE_SECONDS * rate) as usize;
    let attack = ((ATTACK_SECONDS * rate) as usize).max(1);
    let mut mix = vec![0f32; BLOCK_SAMPLES];
    let mut pcm = Vec::with_capacity(BLOCK_SAMPLES);

    for block_start in (0..total).step_by(BLOCK_SAMPLES) {
        let block_end = total.min(block_start + BLOCK_SAMPLES);
        let block = &mut mix[..block_end - block_start];
        block.fill(0.0);

        for note in notes {
            let first = (note.start * rate) as usize;
            if first >= block_end {
                break;
            }
            let held = ((note.end - note.start).max(0.0) * rate) as usize;
            let last = first + held + release;
            if last <= block_start {
                continue;
            }

            let step = TAU * frequency(note.key) / sample_rate as f32;
            let gain = NOTE_GAIN * f32::from(note.velocity) / 127.0;
            for index in first.max(block_start)..last.min(block_end) {
                let offset = index - first;
                let envelope = if offset < attack {
                    offset as f32 / attack as f32
                } else if offset < held {
                    1.0
                } else {
                    1.0 - (offset - held) as f32 / release as f32
                };
                block[index - block_start] += (step * offset as f32).sin() * gain * envelope;
            }
        }

        pcm.clear();
        pcm.extend(block.iter().map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16));
        emit(&pcm)?;
    }
    Ok(())
}

/// Renders a Standard MIDI File to a WAV file at `SAMPLE_RATE`.
pub fn render_wav(midi: &[u8]) -> SourceResult<Vec<u8>> {
    let smf = Smf::parse(midi).map_err(|e| SourceError::Decode(format!("invalid MIDI file: {}", e)))?;
    let notes = collect_notes(&smf);
    let total = sample_count(&notes, SAMPLE_RATE)?;
    debug!("Rendering {} MIDI notes into {} samples", notes.len(), total);

    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| SourceError::Decode(format!("failed to write WAV: {}", e));

    let mut cursor = Cursor::new(Vec::with_capacity(44 + total * 2));
    let mut writer = WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    synthesize(&notes, SAMPLE_RATE, total, |block| {
        block
            .iter()
            .try_for_each(|&sample| writer.write_sample(sample))
            .map_err(wav_error)
    })?;
    writer.finalize().map_err(wav_error)?;
    Ok(cursor.into_inner())
}

pub struct MidiSource {
    client: reqwest::Client,
}

impl MidiSource {
    pub fn new(_config: &SourcesConfig) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
        }
    }
}

#[async_trait]
impl SourceProvider for MidiSource {
    fn source(&self) -> &'static str {
        "midi"
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && Url::parse(resource).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
    }

    async fn resolve(&self, resource: &str, _search: Option<&str>) -> SourceResult<ResolutionResult> {
        if !self.can_be_used(resource, None) {
            return Err(SourceError::Unsupported(resource.to_string()));
        }

        let response = ensure_success(self.client.get(resource).send().await?, "MIDI host").await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        debug!("{} served as {:?}", resource, content_type);
        Ok(process_unknown(resource, content_type))
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        info!("Rendering MIDI file {}", uri);

        let response = ensure_success(self.client.get(uri).send().await?, "MIDI host").await?;
        let midi = response.bytes().await?;
        if midi.is_empty() {
            return Err(SourceError::Decode("There was no body for that midi file".to_string()));
        }

        let wav = tokio::task::spawn_blocking(move || render_wav(&midi))
            .await
            .map_err(|e| SourceError::Decode(format!("MIDI render task failed: {}", e)))??;
        Ok(StreamOutput::from_bytes(Bytes::from(wav), Some(StreamKind::Raw)))
    }
}
