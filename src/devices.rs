//! Device sets, input sources, modes, and channel masks.
//!
//! Output and input devices are small bit sets: a stream may be routed to
//! several physical devices at once (e.g. speaker and wired headset during
//! a ringtone). The routing layer normalizes these sets into route ids, so
//! the values here only need to be stable within the parameter protocol.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of physical output devices, as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputDevices(u32);

impl OutputDevices {
    /// Empty set.
    pub const NONE: Self = Self(0);
    /// Handset earpiece.
    pub const EARPIECE: Self = Self(0x1);
    /// Built-in loudspeaker.
    pub const SPEAKER: Self = Self(0x2);
    /// Wired headset (with microphone).
    pub const WIRED_HEADSET: Self = Self(0x4);
    /// Wired headphones (no microphone).
    pub const WIRED_HEADPHONE: Self = Self(0x8);
    /// Bluetooth SCO link.
    pub const BT_SCO: Self = Self(0x10);
    /// Bluetooth SCO headset.
    pub const BT_SCO_HEADSET: Self = Self(0x20);
    /// Bluetooth SCO car kit.
    pub const BT_SCO_CARKIT: Self = Self(0x40);
    /// Union of all Bluetooth SCO variants.
    pub const ALL_SCO: Self = Self(0x10 | 0x20 | 0x40);

    /// Builds a set from raw bits, dropping unknown ones.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0x7f)
    }

    /// Raw bit representation, for the parameter protocol.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if any device is shared with `other`.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Number of devices in the set.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

impl BitOr for OutputDevices {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OutputDevices {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::LowerHex for OutputDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Set of physical input devices, as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputDevices(u32);

impl InputDevices {
    /// Empty set.
    pub const NONE: Self = Self(0);
    /// Built-in microphone.
    pub const BUILTIN_MIC: Self = Self(0x1);
    /// Wired headset microphone.
    pub const WIRED_HEADSET: Self = Self(0x2);
    /// Bluetooth SCO headset microphone.
    pub const BT_SCO_HEADSET: Self = Self(0x4);

    /// Builds a set from raw bits, dropping unknown ones.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0x7)
    }

    /// Raw bit representation, for the parameter protocol.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if any device is shared with `other`.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

/// Use case a capture client declares for an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputSource {
    /// No active capture use case.
    #[default]
    Default,
    /// Plain microphone capture.
    Mic,
    /// Camcorder recording.
    Camcorder,
    /// Voice recognition / assistant.
    VoiceRecognition,
    /// Two-way voice communication (VoIP).
    VoiceCommunication,
    /// Cellular voice call uplink/downlink tap.
    VoiceCall,
}

impl InputSource {
    /// Maps a raw parameter value to a source, `None` for unknown values.
    ///
    /// Zero is reserved as "no source" by the parameter protocol.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Mic),
            2 => Some(Self::Camcorder),
            3 => Some(Self::VoiceRecognition),
            4 => Some(Self::VoiceCommunication),
            5 => Some(Self::VoiceCall),
            _ => None,
        }
    }
}

/// Device-wide operating mode, set by the audio policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    /// Media playback / idle.
    #[default]
    Normal,
    /// Incoming call ringing.
    Ringtone,
    /// Cellular voice call established.
    InCall,
    /// VoIP communication established.
    InCommunication,
}

/// Channel layout of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannelMask {
    /// Two interleaved channels.
    Stereo,
    /// 5.1 surround.
    Surround51,
    /// 7.1 surround.
    Surround71,
}

impl OutputChannelMask {
    /// Name used by the supported-channels parameter query.
    pub fn name(self) -> &'static str {
        match self {
            Self::Stereo => "stereo",
            Self::Surround51 => "5point1",
            Self::Surround71 => "7point1",
        }
    }

    /// Interleaved channel count.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Stereo => 2,
            Self::Surround51 => 6,
            Self::Surround71 => 8,
        }
    }
}

/// Channel layout of an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChannelMask {
    /// Single channel.
    Mono,
    /// Two interleaved channels.
    Stereo,
}

impl InputChannelMask {
    /// Interleaved channel count.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}
