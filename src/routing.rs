//! Route ids and the static device table.
//!
//! Routing normalizes the active (input source, output device set) pair
//! into a pair of small ids, combines them into a composite route id used
//! to detect no-op re-routing, and looks up the named mixer paths plus the
//! voice-processing preset for the combination.
//!
//! The table is built once, keyed by the id pair, and validated for total
//! coverage of the key space at construction instead of relying on null
//! entries or sentinel fallbacks.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::devices::{InputSource, OutputDevices};
use crate::error::HalError;

/// Normalized output-device id, one row of the route id space.
///
/// Exactly two-device combinations of speaker+headset, speaker+headphone
/// (both normalize to [`SpeakerAndHeadset`](Self::SpeakerAndHeadset)) and
/// speaker+earpiece get dedicated composite ids; every other multi-device
/// or unrecognized set is [`None`](Self::None).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputRouteId {
    /// Loudspeaker.
    Speaker = 0,
    /// Handset earpiece.
    Earpiece = 1,
    /// Wired headset.
    Headset = 2,
    /// Wired headphones.
    Headphones = 3,
    /// Bluetooth SCO (any variant).
    BtSco = 4,
    /// Speaker plus wired headset/headphones.
    SpeakerAndHeadset = 5,
    /// Speaker plus earpiece.
    SpeakerAndEarpiece = 6,
    /// No routable output.
    None = 7,
}

/// Number of output route ids, including `None`; sets the bit offset of
/// the input-source half of a route id.
pub const OUT_ROUTE_ID_COUNT: u32 = 8;

/// Output ids that appear as route table columns (everything but `None`).
const OUT_ROUTE_TABLE: [OutputRouteId; 7] = [
    OutputRouteId::Speaker,
    OutputRouteId::Earpiece,
    OutputRouteId::Headset,
    OutputRouteId::Headphones,
    OutputRouteId::BtSco,
    OutputRouteId::SpeakerAndHeadset,
    OutputRouteId::SpeakerAndEarpiece,
];

impl OutputRouteId {
    /// Normalizes an output device set into a route id.
    pub fn from_devices(devices: OutputDevices) -> Self {
        if devices.is_empty() {
            return Self::None;
        }

        if devices.count() == 2 {
            if devices == OutputDevices::SPEAKER | OutputDevices::WIRED_HEADSET
                || devices == OutputDevices::SPEAKER | OutputDevices::WIRED_HEADPHONE
            {
                return Self::SpeakerAndHeadset;
            }
            if devices == OutputDevices::SPEAKER | OutputDevices::EARPIECE {
                return Self::SpeakerAndEarpiece;
            }
            return Self::None;
        }

        if devices.count() != 1 {
            return Self::None;
        }

        match devices {
            OutputDevices::SPEAKER => Self::Speaker,
            OutputDevices::EARPIECE => Self::Earpiece,
            OutputDevices::WIRED_HEADSET => Self::Headset,
            OutputDevices::WIRED_HEADPHONE => Self::Headphones,
            OutputDevices::BT_SCO | OutputDevices::BT_SCO_HEADSET | OutputDevices::BT_SCO_CARKIT => {
                Self::BtSco
            }
            _ => Self::None,
        }
    }
}

/// Normalized input-source id, one column of the route id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRouteId {
    /// Plain microphone capture.
    Mic = 0,
    /// Camcorder recording.
    Camcorder = 1,
    /// Voice recognition.
    VoiceRecognition = 2,
    /// VoIP communication.
    VoiceCommunication = 3,
    /// Cellular voice call.
    VoiceCall = 4,
    /// No active capture.
    None = 5,
}

/// Input ids that appear as route table rows (everything but `None`).
const IN_ROUTE_TABLE: [InputRouteId; 5] = [
    InputRouteId::Mic,
    InputRouteId::Camcorder,
    InputRouteId::VoiceRecognition,
    InputRouteId::VoiceCommunication,
    InputRouteId::VoiceCall,
];

impl InputRouteId {
    /// Normalizes an input source into a route id.
    pub fn from_source(source: InputSource) -> Self {
        match source {
            InputSource::Default => Self::None,
            InputSource::Mic => Self::Mic,
            InputSource::Camcorder => Self::Camcorder,
            InputSource::VoiceRecognition => Self::VoiceRecognition,
            InputSource::VoiceCommunication => Self::VoiceCommunication,
            InputSource::VoiceCall => Self::VoiceCall,
        }
    }
}

/// Composite route id for a (source, device) pair.
///
/// Nonzero for every valid pair, so a zero cache means "no route selected
/// yet" and the first selection always applies.
pub fn route_id(source: InputRouteId, device: OutputRouteId) -> u32 {
    (1 << (source as u32 + OUT_ROUTE_ID_COUNT)) | (1 << device as u32)
}

/// Voice-processing engine preset attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePreset {
    /// Keep whatever preset is currently loaded.
    Current,
    /// Bypass the voice processor.
    Off,
    /// VoIP, handheld position.
    VoipHandheld,
    /// Speech recognition, handheld position.
    AsraHandheld,
    /// VoIP, desktop position.
    VoipDesktop,
    /// Speech recognition, desktop position.
    AsraDesktop,
    /// VoIP over a wired headset.
    VoipHeadset,
    /// Speech recognition over a wired headset.
    AsraHeadset,
    /// VoIP over headphones.
    VoipHeadphones,
    /// VoIP over headphones, desktop position.
    VoipHpDesktop,
    /// Camcorder capture.
    Camcorder,
}

/// Tuning mode of the voice processor, selecting between the two presets a
/// route carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceFxMode {
    /// Baseline tuning.
    Default,
    /// Level-optimized tuning.
    #[default]
    Level,
}

/// Immutable description of one route: the named mixer paths to apply and
/// the voice-processing preset per tuning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteConfig {
    /// Output mixer path name, opaque to the core.
    pub output_route: &'static str,
    /// Input mixer path name, opaque to the core.
    pub input_route: &'static str,
    presets: [VoicePreset; 2],
}

impl RouteConfig {
    const fn new(output_route: &'static str, input_route: &'static str, presets: [VoicePreset; 2]) -> Self {
        Self {
            output_route,
            input_route,
            presets,
        }
    }

    /// Preset for the given tuning mode.
    pub fn preset_for(&self, mode: VoiceFxMode) -> VoicePreset {
        match mode {
            VoiceFxMode::Default => self.presets[0],
            VoiceFxMode::Level => self.presets[1],
        }
    }
}

const VOICE_SPEAKER: RouteConfig = RouteConfig::new(
    "voice-speaker",
    "voice-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const VOICE_EARPIECE: RouteConfig = RouteConfig::new(
    "voice-earpiece",
    "voice-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const VOICE_HEADPHONES: RouteConfig = RouteConfig::new(
    "voice-headphones",
    "voice-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const VOICE_HEADSET: RouteConfig = RouteConfig::new(
    "voice-headphones",
    "voice-headset-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const MEDIA_SPEAKER: RouteConfig = RouteConfig::new(
    "media-speaker",
    "media-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const MEDIA_EARPIECE: RouteConfig = RouteConfig::new(
    "media-earpiece",
    "media-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const MEDIA_HEADPHONES: RouteConfig = RouteConfig::new(
    "media-headphones",
    "media-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const MEDIA_HEADSET: RouteConfig = RouteConfig::new(
    "media-headphones",
    "media-headset-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const CAMCORDER_SPEAKER: RouteConfig = RouteConfig::new(
    "media-speaker",
    "media-second-mic",
    [VoicePreset::Camcorder, VoicePreset::Camcorder],
);
const CAMCORDER_HEADPHONES: RouteConfig = RouteConfig::new(
    "media-headphones",
    "media-second-mic",
    [VoicePreset::Camcorder, VoicePreset::Camcorder],
);
const VOICE_REC_SPEAKER: RouteConfig = RouteConfig::new(
    "voice-rec-speaker",
    "voice-rec-main-mic",
    [VoicePreset::AsraHandheld, VoicePreset::AsraDesktop],
);
const VOICE_REC_HEADPHONES: RouteConfig = RouteConfig::new(
    "voice-rec-headphones",
    "voice-rec-main-mic",
    [VoicePreset::AsraHandheld, VoicePreset::AsraDesktop],
);
const VOICE_REC_HEADSET: RouteConfig = RouteConfig::new(
    "voice-rec-headphones",
    "voice-rec-headset-mic",
    [VoicePreset::AsraHeadset, VoicePreset::AsraHeadset],
);
const COMMUNICATION_SPEAKER: RouteConfig = RouteConfig::new(
    "communication-speaker",
    "communication-main-mic",
    [VoicePreset::VoipHandheld, VoicePreset::VoipDesktop],
);
const COMMUNICATION_EARPIECE: RouteConfig = RouteConfig::new(
    "communication-earpiece",
    "communication-main-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const COMMUNICATION_HEADPHONES: RouteConfig = RouteConfig::new(
    "communication-headphones",
    "communication-main-mic",
    [VoicePreset::VoipHeadphones, VoicePreset::VoipHpDesktop],
);
const COMMUNICATION_HEADSET: RouteConfig = RouteConfig::new(
    "communication-headphones",
    "communication-headset-mic",
    [VoicePreset::VoipHeadset, VoicePreset::VoipHeadset],
);
const SPEAKER_AND_HEADPHONES: RouteConfig = RouteConfig::new(
    "speaker-and-headphones",
    "main-mic",
    [VoicePreset::Current, VoicePreset::Current],
);
const BLUETOOTH_SCO: RouteConfig = RouteConfig::new(
    "bt-sco-headset",
    "bt-sco-mic",
    [VoicePreset::Off, VoicePreset::Off],
);
const NONE: RouteConfig = RouteConfig::new("none", "none", [VoicePreset::Off, VoicePreset::Off]);

/// Row-major table definition: one row per input source, one column per
/// output device, in the order of [`IN_ROUTE_TABLE`] / [`OUT_ROUTE_TABLE`].
const ROUTE_DEFS: [[&RouteConfig; OUT_ROUTE_TABLE.len()]; IN_ROUTE_TABLE.len()] = [
    // Mic
    [
        &MEDIA_SPEAKER,
        &MEDIA_EARPIECE,
        &MEDIA_HEADSET,
        &MEDIA_HEADPHONES,
        &BLUETOOTH_SCO,
        &SPEAKER_AND_HEADPHONES,
        &MEDIA_SPEAKER,
    ],
    // Camcorder
    [
        &CAMCORDER_SPEAKER,
        &NONE,
        &CAMCORDER_HEADPHONES,
        &CAMCORDER_HEADPHONES,
        &BLUETOOTH_SCO,
        &SPEAKER_AND_HEADPHONES,
        &CAMCORDER_SPEAKER,
    ],
    // VoiceRecognition
    [
        &VOICE_REC_SPEAKER,
        &NONE,
        &VOICE_REC_HEADSET,
        &VOICE_REC_HEADPHONES,
        &BLUETOOTH_SCO,
        &SPEAKER_AND_HEADPHONES,
        &VOICE_REC_SPEAKER,
    ],
    // VoiceCommunication
    [
        &COMMUNICATION_SPEAKER,
        &COMMUNICATION_EARPIECE,
        &COMMUNICATION_HEADSET,
        &COMMUNICATION_HEADPHONES,
        &BLUETOOTH_SCO,
        &SPEAKER_AND_HEADPHONES,
        &COMMUNICATION_EARPIECE,
    ],
    // VoiceCall
    [
        &VOICE_SPEAKER,
        &VOICE_EARPIECE,
        &VOICE_HEADSET,
        &VOICE_HEADPHONES,
        &BLUETOOTH_SCO,
        &VOICE_HEADPHONES,
        &VOICE_EARPIECE,
    ],
];

/// Associative route lookup, validated for total coverage at construction.
#[derive(Debug)]
pub struct RouteTable {
    entries: HashMap<(InputRouteId, OutputRouteId), &'static RouteConfig>,
}

impl RouteTable {
    /// Builds the table from the static definitions.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::IncompleteRouteTable`] if any (source, device)
    /// key is missing, so a broken edit fails up front instead of at some
    /// later lookup.
    pub fn new() -> Result<Self, HalError> {
        let mut entries = HashMap::new();
        for (row, source) in IN_ROUTE_TABLE.iter().enumerate() {
            for (col, device) in OUT_ROUTE_TABLE.iter().enumerate() {
                entries.insert((*source, *device), ROUTE_DEFS[row][col]);
            }
        }

        for source in IN_ROUTE_TABLE {
            for device in OUT_ROUTE_TABLE {
                if !entries.contains_key(&(source, device)) {
                    return Err(HalError::IncompleteRouteTable {
                        source_id: source,
                        device,
                    });
                }
            }
        }

        Ok(Self { entries })
    }

    /// Looks up the route for a (source, device) pair.
    ///
    /// Both ids must be routable (not `None`); coverage over that space is
    /// guaranteed by construction.
    pub fn get(&self, source: InputRouteId, device: OutputRouteId) -> &'static RouteConfig {
        self.entries
            .get(&(source, device))
            .copied()
            .unwrap_or(&NONE)
    }
}

/// The process-wide route table.
pub static ROUTE_TABLE: Lazy<RouteTable> =
    Lazy::new(|| RouteTable::new().expect("static route table covers every source/device pair"));
