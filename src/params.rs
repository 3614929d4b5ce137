//! Key/value parameter protocol.
//!
//! The layers above this HAL communicate configuration through flat
//! `key=value;key=value` strings. This module keeps an explicit key/value
//! list plus the keys this core recognizes; everything unrecognized is
//! carried through untouched for other consumers.

use std::fmt;
use std::str::FromStr;

/// Parameter keys recognized by the core.
pub mod keys {
    /// Stream routing device mask (decimal bit set).
    pub const ROUTING: &str = "routing";
    /// Capture use case for an input stream (decimal raw source value).
    pub const INPUT_SOURCE: &str = "input_source";
    /// Query key for the supported output channel masks.
    pub const SUP_CHANNELS: &str = "sup_channels";
    /// Bluetooth headset echo-cancel/noise-reduction, `on`/`off`.
    pub const BT_NREC: &str = "bt_headset_nrec";
    /// Two-mic noise suppression, `on`/`off`.
    pub const NOISE_SUPPRESSION: &str = "noise_suppression";

    /// Boolean parameter value: enabled.
    pub const ON: &str = "on";
    /// Boolean parameter value: disabled.
    pub const OFF: &str = "off";
}

/// An ordered key/value parameter list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    pairs: Vec<(String, String)>,
}

impl Parameters {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        if let Some(pair) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            pair.1 = value;
        } else {
            self.pairs.push((key, value));
        }
        self
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value for `key` parsed as an unsigned integer.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)?.parse().ok()
    }

    /// Returns `true` if no parameters are present.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromStr for Parameters {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut params = Self::new();
        for pair in s.split(';').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => params.set(k, v),
                // A bare key queries rather than sets; keep it with an
                // empty value so get() still finds it.
                None => params.set(pair, ""),
            };
        }
        Ok(params)
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut params = Parameters::new();
        params.set(keys::ROUTING, 2u32);
        assert_eq!(params.get(keys::ROUTING), Some("2"));
        assert_eq!(params.get_u32(keys::ROUTING), Some(2));
        assert_eq!(params.get("absent"), None);
    }

    #[test]
    fn test_set_replaces_existing() {
        let mut params = Parameters::new();
        params.set("k", 1u32).set("k", 2u32);
        assert_eq!(params.get_u32("k"), Some(2));
        assert_eq!(params.iter().count(), 1);
    }

    #[test]
    fn test_wire_round_trip() {
        let parsed: Parameters = "routing=2;bt_headset_nrec=on".parse().unwrap();
        assert_eq!(parsed.get_u32(keys::ROUTING), Some(2));
        assert_eq!(parsed.get(keys::BT_NREC), Some(keys::ON));
        assert_eq!(parsed.to_string(), "routing=2;bt_headset_nrec=on");
    }

    #[test]
    fn test_bare_key_is_a_query() {
        let parsed: Parameters = "sup_channels".parse().unwrap();
        assert_eq!(parsed.get(keys::SUP_CHANNELS), Some(""));
    }

    #[test]
    fn test_empty_string() {
        let parsed: Parameters = "".parse().unwrap();
        assert!(parsed.is_empty());
    }
}
