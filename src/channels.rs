//! Channel list parsing.
//!
//! Two colon-separated formats are accepted per line:
//!
//! * the 9-field gateway format
//!   `name:freq_mhz:pol:unused:symrate_ksym:vpid:apid:sid:delsys`,
//!   where `delsys` is the numeric delivery system code (5 = DVB-S,
//!   6 = DVB-S2)
//! * the classic 8-field szap format (same minus the trailing delivery
//!   system field, implying DVB-S)
//!
//! Frequencies are given in MHz and symbol rates in kSym/s; both are
//! scaled by 1000 on load. Malformed lines are logged and skipped.

use std::path::Path;

use crate::tune::{DeliverySystem, Tune};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("cannot read channel list: {0}")]
    Io(#[from] std::io::Error),
}

/// One named service from the channel list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub tune: Tune,
}

/// All channels from one list file.
#[derive(Debug, Clone, Default)]
pub struct ChannelList {
    channels: Vec<Channel>,
}

impl ChannelList {
    /// Load and parse a channel list. Blank lines and `#` comments are
    /// ignored, malformed lines are skipped with a log entry.
    pub fn load(path: &Path) -> Result<Self, ChannelError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut channels = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Ok(channel) => channels.push(channel),
                Err(reason) => {
                    log::warn!("channel list line {}: {reason}, skipping", idx + 1);
                }
            }
        }
        log::info!("loaded {} channels", channels.len());
        ChannelList { channels }
    }

    /// Case-insensitive lookup by channel name.
    pub fn find(&self, name: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn parse_line(line: &str) -> Result<Channel, String> {
    let fields: Vec<&str> = line.split(':').collect();
    let delivery_system = match fields.len() {
        8 => DeliverySystem::DvbS,
        9 => {
            let code: u32 = fields[8]
                .parse()
                .map_err(|_| format!("bad delivery system {:?}", fields[8]))?;
            DeliverySystem::from_code(code)
                .ok_or_else(|| format!("unsupported delivery system {code}"))?
        }
        n => return Err(format!("expected 8 or 9 fields, got {n}")),
    };

    let name = fields[0].to_owned();
    if name.is_empty() {
        return Err("empty channel name".into());
    }
    let frequency: u32 = fields[1]
        .parse::<u32>()
        .map_err(|_| format!("bad frequency {:?}", fields[1]))?
        * 1000;
    // Horizontal unless stated otherwise; circular polarizations map to
    // vertical, as receivers for those list them that way.
    let horizontal = fields[2].eq_ignore_ascii_case("h");
    let symbol_rate: u32 = fields[4]
        .parse::<u32>()
        .map_err(|_| format!("bad symbol rate {:?}", fields[4]))?
        * 1000;
    let sid: u16 = fields[7]
        .parse()
        .map_err(|_| format!("bad service id {:?}", fields[7]))?;

    Ok(Channel {
        name,
        tune: Tune {
            delivery_system,
            frequency,
            symbol_rate,
            horizontal,
            sid,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
# Astra 19.2E
Das Erste HD:11494:h:0:22000:101:102:10301:6
ZDF:11954:H:0:27500:110:120:28006:5

arte:10744:v:1:22000:401:402:28724
";

    #[test]
    fn parses_both_formats() {
        let list = ChannelList::parse(LIST);
        assert_eq!(list.len(), 3);

        let erste = list.find("Das Erste HD").unwrap();
        assert_eq!(erste.tune.delivery_system, DeliverySystem::DvbS2);
        assert_eq!(erste.tune.frequency, 11_494_000);
        assert_eq!(erste.tune.symbol_rate, 22_000_000);
        assert!(erste.tune.horizontal);
        assert_eq!(erste.tune.sid, 10301);

        // szap line without delivery system defaults to DVB-S.
        let arte = list.find("arte").unwrap();
        assert_eq!(arte.tune.delivery_system, DeliverySystem::DvbS);
        assert!(!arte.tune.horizontal);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let list = ChannelList::parse(LIST);
        assert!(list.find("zdf").is_some());
        assert!(list.find("nope").is_none());
    }

    #[test]
    fn skips_malformed_lines() {
        let list = ChannelList::parse("bad line\nok:11494:h:0:22000:1:2:3:6\n");
        assert_eq!(list.len(), 1);
        assert!(ChannelList::parse("x:abc:h:0:22000:1:2:3:6").is_empty());
        assert!(ChannelList::parse("x:123:h:0:22000:1:2:3:8").is_empty());
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let list = ChannelList::parse("# only a comment\n\n");
        assert!(list.is_empty());
    }
}
