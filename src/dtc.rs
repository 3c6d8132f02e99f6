//! Active DTC (diagnostic trouble code) set. The engine holds only the
//! single most recently ingested set; conditions that opt in get it embedded
//! verbatim into their snapshot.

use crate::signal::Timestamp;

/// OBD service mode the DTC list was read under (e.g. mode `0x03`, current
/// DTCs; mode `0x07`, pending DTCs).
pub type ServiceMode = u8;

/// The vehicle's active diagnostic trouble codes as of one read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DtcInfo {
    /// OBD service mode this list was read under.
    pub service_mode: ServiceMode,
    /// Wall-clock time the ECU reported these codes.
    pub receive_time: Timestamp,
    /// DTC codes currently active (e.g. `"P0100"`).
    pub dtc_code_list: Vec<String>,
}

impl DtcInfo {
    /// Builds a DTC set.
    pub fn new(service_mode: ServiceMode, receive_time: Timestamp, dtc_code_list: Vec<String>) -> Self {
        DtcInfo {
            service_mode,
            receive_time,
            dtc_code_list,
        }
    }
}

/// Holds the single most recently ingested [`DtcInfo`]. A plain
/// replace-on-ingest cell; the engine reads `current()` when a condition
/// requests `include_active_dtcs`.
#[derive(Debug, Clone, Default)]
pub struct ActiveDtcStore {
    current: Option<DtcInfo>,
}

impl ActiveDtcStore {
    /// An empty store: no DTC set has been ingested yet.
    pub fn new() -> Self {
        ActiveDtcStore::default()
    }

    /// Replaces the current active-DTC set.
    pub fn ingest(&mut self, info: DtcInfo) {
        self.current = Some(info);
    }

    /// The most recently ingested set, if any.
    pub fn current(&self) -> Option<&DtcInfo> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_replaces_previous_set() {
        let mut store = ActiveDtcStore::new();
        assert!(store.current().is_none());

        store.ingest(DtcInfo::new(3, 100, vec!["P0100".into()]));
        assert_eq!(store.current().unwrap().dtc_code_list, vec!["P0100"]);

        store.ingest(DtcInfo::new(3, 200, vec!["P0200".into(), "P0300".into()]));
        let current = store.current().unwrap();
        assert_eq!(current.receive_time, 200);
        assert_eq!(current.dtc_code_list.len(), 2);
    }
}
