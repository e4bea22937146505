//! Tuning parameters for DVB-S/S2 transponders.

/// Delivery systems handled by the gateway, with their Linux DVB API codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliverySystem {
    /// DVB-S (QPSK).
    DvbS,
    /// DVB-S2.
    DvbS2,
}

impl DeliverySystem {
    /// Map a Linux `fe_delivery_system` code to a supported system.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            5 => Some(DeliverySystem::DvbS),
            6 => Some(DeliverySystem::DvbS2),
            _ => None,
        }
    }

    /// The Linux `fe_delivery_system` code.
    pub fn code(&self) -> u32 {
        match self {
            DeliverySystem::DvbS => 5,
            DeliverySystem::DvbS2 => 6,
        }
    }
}

/// One transponder/service selection.
///
/// Frequency is in kHz (i.e. `11_747_000` for 11.747 GHz), symbol rate in
/// symbols per second. Two selections land on the same transponder when
/// everything except the service id matches, see [`Tune::same_transponder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tune {
    pub delivery_system: DeliverySystem,
    /// Transponder frequency in kHz, before LNB downconversion.
    pub frequency: u32,
    /// Symbol rate in symbols per second.
    pub symbol_rate: u32,
    /// True for horizontal polarization, false for vertical.
    pub horizontal: bool,
    /// Requested service id within the multiplex.
    pub sid: u16,
}

impl Tune {
    /// Whether `other` is carried on the same physical transponder.
    ///
    /// The service id deliberately does not participate: clients watching
    /// different programs of one multiplex share a single frontend.
    pub fn same_transponder(&self, other: &Tune) -> bool {
        self.delivery_system == other.delivery_system
            && self.frequency == other.frequency
            && self.symbol_rate == other.symbol_rate
            && self.horizontal == other.horizontal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn astra(sid: u16) -> Tune {
        Tune {
            delivery_system: DeliverySystem::DvbS2,
            frequency: 11_747_000,
            symbol_rate: 27_500_000,
            horizontal: true,
            sid,
        }
    }

    #[test]
    fn sharing_ignores_service_id() {
        assert!(astra(100).same_transponder(&astra(200)));
        assert_ne!(astra(100), astra(200));
    }

    #[test]
    fn sharing_respects_polarization() {
        let mut other = astra(100);
        other.horizontal = false;
        assert!(!astra(100).same_transponder(&other));
    }

    #[test]
    fn delivery_system_codes() {
        assert_eq!(DeliverySystem::from_code(5), Some(DeliverySystem::DvbS));
        assert_eq!(DeliverySystem::from_code(6), Some(DeliverySystem::DvbS2));
        assert_eq!(DeliverySystem::from_code(3), None);
        assert_eq!(DeliverySystem::DvbS2.code(), 6);
    }
}
