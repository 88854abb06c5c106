use crate::devices::joystick::JoystickCalibration;
use crate::error::{BridgeError, Result};
use crate::protocol::RawFrame;
use crate::station::StationState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use tracing::{debug, info};

/// Number of operator-facing station slots.
pub const MAX_STATIONS: usize = 10;

/// Peer-assigned station identifier. Zero is reserved and cannot be
/// represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationHash(NonZeroU32);

impl StationHash {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(StationHash)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for StationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.get())
    }
}

/// Zero-based station slot, always below [`MAX_STATIONS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationIndex(u8);

impl StationIndex {
    pub fn new(index: usize) -> Option<Self> {
        if index < MAX_STATIONS {
            Some(StationIndex(index as u8))
        } else {
            None
        }
    }

    /// Converts a 1-based firmware slot number. 0 means the firmware does
    /// not report one.
    pub fn from_firmware(number: u8) -> Option<Self> {
        usize::from(number).checked_sub(1).and_then(Self::new)
    }

    pub fn get(self) -> usize {
        usize::from(self.0)
    }

    /// 1-based number printed on tickets and shown to operators.
    pub fn number(self) -> usize {
        self.get() + 1
    }

    pub fn all() -> impl Iterator<Item = StationIndex> {
        (0..MAX_STATIONS as u8).map(StationIndex)
    }
}

impl fmt::Display for StationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binding between station slots and peer station hashes, plus the state of
/// every station the peer has reported.
///
/// Stations stay tracked after losing their slot; only the binding changes.
#[derive(Debug, Default)]
pub struct StationRegistry {
    slots: [Option<StationHash>; MAX_STATIONS],
    calibration: [JoystickCalibration; MAX_STATIONS],
    stations: HashMap<StationHash, StationState>,
    // First-seen order, for deterministic "any station" queries.
    order: Vec<StationHash>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `hash` to slot `index`.
    ///
    /// A hash already sitting in another slot leaves it, and the slot's
    /// previous hash keeps its state but loses its index. The slot's stored
    /// calibration is applied to the newly bound station.
    pub fn assign(&mut self, hash: u32, index: usize) -> Result<StationIndex> {
        let hash = StationHash::new(hash).ok_or(BridgeError::ZeroHash)?;
        let index = StationIndex::new(index).ok_or(BridgeError::InvalidIndex(index))?;
        self.bind(hash, index);
        Ok(index)
    }

    fn bind(&mut self, hash: StationHash, index: StationIndex) {
        if self.slots[index.get()] == Some(hash) {
            return;
        }

        if let Some(previous) = self.index_of(hash) {
            self.slots[previous.get()] = None;
            debug!(%hash, from = %previous, to = %index, "Moving station to new slot");
        }

        if let Some(evicted) = self.slots[index.get()].take() {
            if let Some(state) = self.stations.get_mut(&evicted) {
                state.set_index(None);
            }
            info!(hash = %evicted, slot = %index, "Station unbound from slot");
        }

        self.slots[index.get()] = Some(hash);
        let calibration = self.calibration[index.get()];
        let state = self.track(hash);
        state.set_index(Some(index));
        state.joystick.set_calibration(calibration);

        info!(%hash, slot = %index, "Station bound");
    }

    /// Inserts an unbound state for `hash` if it is not tracked yet.
    pub fn track(&mut self, hash: StationHash) -> &mut StationState {
        if !self.stations.contains_key(&hash) {
            self.order.push(hash);
        }
        self.stations
            .entry(hash)
            .or_insert_with(|| StationState::new(hash))
    }

    /// Binds a station announced by its draxboard. An existing binding is
    /// kept; otherwise the firmware slot is used when free, then the first
    /// free slot. With every slot taken the station is tracked unbound.
    pub fn bind_on_connect(
        &mut self,
        hash: StationHash,
        firmware_slot: u8,
    ) -> Option<StationIndex> {
        if let Some(index) = self.index_of(hash) {
            self.track(hash);
            return Some(index);
        }

        let preferred = StationIndex::from_firmware(firmware_slot)
            .filter(|index| self.slots[index.get()].is_none());
        let chosen = preferred.or_else(|| self.first_free_slot());

        match chosen {
            Some(index) => {
                self.bind(hash, index);
                Some(index)
            }
            None => {
                self.track(hash);
                info!(%hash, "No free slot, tracking station unbound");
                None
            }
        }
    }

    fn first_free_slot(&self) -> Option<StationIndex> {
        StationIndex::all().find(|index| self.slots[index.get()].is_none())
    }

    pub fn lookup_by_hash(&self, hash: StationHash) -> Option<&StationState> {
        self.stations.get(&hash)
    }

    pub fn lookup_by_hash_mut(&mut self, hash: StationHash) -> Option<&mut StationState> {
        self.stations.get_mut(&hash)
    }

    pub fn lookup_by_index(&self, index: StationIndex) -> Option<&StationState> {
        self.hash_for_index(index)
            .and_then(|hash| self.stations.get(&hash))
    }

    pub fn lookup_by_index_mut(&mut self, index: StationIndex) -> Option<&mut StationState> {
        let hash = self.hash_for_index(index)?;
        self.stations.get_mut(&hash)
    }

    pub fn hash_for_index(&self, index: StationIndex) -> Option<StationHash> {
        self.slots[index.get()]
    }

    pub fn index_of(&self, hash: StationHash) -> Option<StationIndex> {
        StationIndex::all().find(|index| self.slots[index.get()] == Some(hash))
    }

    /// Reads the station hash of a station-scoped frame. Short frames and
    /// hash 0 resolve to `None`.
    pub fn resolve_station_hash(frame: &RawFrame) -> Option<StationHash> {
        frame.station_hash()
    }

    pub fn calibration(&self, index: StationIndex) -> JoystickCalibration {
        self.calibration[index.get()]
    }

    /// Stores calibration for a slot and applies it to the bound station.
    pub fn set_calibration(&mut self, index: StationIndex, calibration: JoystickCalibration) {
        self.calibration[index.get()] = calibration;
        if let Some(state) = self.lookup_by_index_mut(index) {
            state.joystick.set_calibration(calibration);
        }
    }

    /// Iterates tracked stations in first-seen order.
    pub fn stations(&self) -> impl Iterator<Item = &StationState> {
        self.order.iter().filter_map(|hash| self.stations.get(hash))
    }

    pub fn stations_mut(&mut self) -> impl Iterator<Item = &mut StationState> {
        self.stations.values_mut()
    }

    pub fn bound_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn tracked_count(&self) -> usize {
        self.stations.len()
    }
}
