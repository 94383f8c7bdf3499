//! Per-channel metadata
//!
//! A channel is one logical output stream: a mux of exactly one video
//! sub-stream and zero or more audio sub-streams. Descriptors are built once
//! at configuration time and immutable afterwards; whoever wires channels
//! together consumes them.

/// Capability of a channel, as a closed set of variants
///
/// Output sinks differ only in whether they carry audio and how many audio
/// sub-streams the mux contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Video only, no audio sub-streams
    VideoOnly,
    /// Video plus a fixed number of audio sub-streams
    AudioVideo {
        /// Number of audio sub-streams in the mux
        audio_streams: u8,
    },
}

/// Static metadata for one output channel
///
/// The video stream count is fixed at 1 for this subsystem; the audio count
/// comes from the channel kind. `buffers_max` is the per-client output
/// buffering limit the attachment point enforces before evicting a slow
/// consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    name: String,
    kind: ChannelKind,
    buffers_max: usize,
}

impl ChannelDescriptor {
    /// Create a descriptor for a channel
    pub fn new(name: impl Into<String>, kind: ChannelKind, buffers_max: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            buffers_max,
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel capability
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether the channel carries audio
    pub fn has_audio(&self) -> bool {
        matches!(self.kind, ChannelKind::AudioVideo { .. })
    }

    /// Number of audio sub-streams in the mux
    pub fn audio_streams(&self) -> u8 {
        match self.kind {
            ChannelKind::VideoOnly => 0,
            ChannelKind::AudioVideo { audio_streams } => audio_streams,
        }
    }

    /// Number of video sub-streams in the mux (always 1)
    pub fn video_streams(&self) -> u8 {
        1
    }

    /// Per-client output buffering limit, in chunks
    pub fn buffers_max(&self) -> usize {
        self.buffers_max
    }

    /// Lookup key for the channel's fan-out element inside the media graph
    pub fn attachment_key(&self) -> String {
        format!("fd-{}", self.name)
    }
}

impl std::fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Channel[{}]", self.name)
    }
}
