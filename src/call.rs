//! Voice-call and Bluetooth SCO PCM pair management.
//!
//! Both the cellular voice path and the SCO link are full-duplex pairs of
//! kernel PCMs (RX playback plus TX capture) that exist independently of
//! any client stream. Opening is ordered RX then TX with unwinding on
//! partial failure; a pair that is already open is left alone.

use tracing::{debug, error, warn};

use crate::config::{
    pcm_config_sco, pcm_config_voice, PcmConfig, PCM_CARD, PCM_DEVICE_SCO, PCM_DEVICE_VOICE,
};
use crate::device::DeviceState;
use crate::devices::OutputDevices;
use crate::error::HalError;
use crate::hw::{CallAudioPath, PcmDirection, PcmStream};

/// An open full-duplex PCM pair. Dropping the pair closes both handles.
pub(crate) struct PcmPair {
    rx: Box<dyn PcmStream>,
    tx: Box<dyn PcmStream>,
}

impl PcmPair {
    /// Stops both directions ahead of closing. Stop failures are logged
    /// and otherwise ignored; the handles are dropped either way.
    pub(crate) fn stop(&mut self) {
        if let Err(error) = self.rx.stop() {
            warn!(%error, "failed to stop rx pcm");
        }
        if let Err(error) = self.tx.stop() {
            warn!(%error, "failed to stop tx pcm");
        }
    }
}

impl DeviceState {
    /// Opens an RX/TX pair on `device`, unwinding on partial failure.
    fn open_duplex(&self, device: u32, config: PcmConfig, label: &str) -> Result<PcmPair, HalError> {
        let rx = self
            .pcm
            .open(PCM_CARD, device, PcmDirection::Out, config)
            .map_err(|error| HalError::PcmOpen {
                device,
                reason: error.to_string(),
            })?;
        if !rx.is_ready() {
            return Err(HalError::PcmOpen {
                device,
                reason: format!("{label} rx stream not ready"),
            });
        }

        // The rx handle unwinds on drop if tx fails.
        let tx = self
            .pcm
            .open(PCM_CARD, device, PcmDirection::In, config)
            .map_err(|error| HalError::PcmOpen {
                device,
                reason: error.to_string(),
            })?;
        if !tx.is_ready() {
            return Err(HalError::PcmOpen {
                device,
                reason: format!("{label} tx stream not ready"),
            });
        }

        let mut pair = PcmPair { rx, tx };
        if let Err(error) = pair.rx.start() {
            warn!(%error, "failed to start {label} rx pcm");
        }
        if let Err(error) = pair.tx.start() {
            warn!(%error, "failed to start {label} tx pcm");
        }
        Ok(pair)
    }

    /// Opens and starts the Bluetooth SCO PCM pair.
    ///
    /// Failures are logged, not surfaced; SCO traffic resumes on the next
    /// route change that re-runs this.
    pub(crate) fn start_bt_sco(&mut self) {
        if self.pcm_sco.is_some() {
            warn!("sco pcms already open");
            return;
        }

        debug!("opening sco pcms");
        match self.open_duplex(PCM_DEVICE_SCO, pcm_config_sco(self.wb_amr), "sco") {
            Ok(pair) => self.pcm_sco = Some(pair),
            Err(error) => error!(%error, "cannot open sco pcms"),
        }
    }

    /// Stops and closes the Bluetooth SCO PCM pair, if open.
    pub(crate) fn end_bt_sco(&mut self) {
        debug!("closing sco pcms");
        if let Some(mut pair) = self.pcm_sco.take() {
            pair.stop();
        }
    }

    /// Opens and starts the voice-call PCM pair toward the modem.
    ///
    /// An already-open pair is reported as success, so re-entering the
    /// in-call state is harmless.
    pub(crate) fn start_voice_call(&mut self) -> Result<(), HalError> {
        if self.pcm_voice.is_some() {
            warn!("voice pcms already open");
            return Ok(());
        }

        debug!("opening voice pcms");
        let pair = self.open_duplex(PCM_DEVICE_VOICE, pcm_config_voice(self.wb_amr), "voice")?;
        self.pcm_voice = Some(pair);
        Ok(())
    }

    /// Stops and closes the voice-call PCM pair, if open.
    pub(crate) fn end_voice_call(&mut self) {
        debug!("closing voice pcms");
        if let Some(mut pair) = self.pcm_voice.take() {
            pair.stop();
        }
    }

    /// Tells the radio which acoustic path carries call audio, derived from
    /// the active output device set.
    ///
    /// Only exact single-device sets map to a dedicated path; anything else
    /// falls back to the handset path. On SCO the in-headset noise
    /// reduction choice follows the `bt_headset_nrec` parameter.
    pub(crate) fn notify_call_audio_path(&mut self) {
        let path = if self.out_device == OutputDevices::SPEAKER {
            CallAudioPath::Speaker
        } else if self.out_device == OutputDevices::EARPIECE {
            CallAudioPath::Handset
        } else if self.out_device == OutputDevices::WIRED_HEADSET {
            CallAudioPath::Headset
        } else if self.out_device == OutputDevices::WIRED_HEADPHONE {
            CallAudioPath::Headphone
        } else if self.out_device == OutputDevices::BT_SCO
            || self.out_device == OutputDevices::BT_SCO_HEADSET
            || self.out_device == OutputDevices::BT_SCO_CARKIT
        {
            if self.bluetooth_nrec {
                CallAudioPath::Bluetooth
            } else {
                CallAudioPath::BluetoothNoNr
            }
        } else {
            CallAudioPath::Handset
        };

        debug!(?path, "selecting call audio path");
        self.radio.set_call_audio_path(path);
    }
}
