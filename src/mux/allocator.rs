//! Local channel id allocation.
//!
//! Ids are handed out just past the highest allocated id, wrapping from
//! `u32::MAX` back to 1 (0 is reserved for "no channel" in headers). After a
//! wrap the candidate walks forward past still-allocated ids until it finds
//! a hole.

use crate::core::constants::MIN_CHANNEL_ID;
use crate::core::MuxError;
use crate::mux::table::ChannelTable;

/// Allocate a fresh local channel id.
///
/// Fails with [`MuxError::NoChannels`] when the table is already at its
/// `max_channels` cap.
pub(crate) fn allocate(table: &ChannelTable) -> Result<u32, MuxError> {
    if table.is_full() {
        return Err(MuxError::NoChannels);
    }

    let mut candidate = table.max_id().map(next_id).unwrap_or(MIN_CHANNEL_ID);
    let mut probes = 0;
    while table.contains_local(candidate) {
        probes += 1;
        if probes >= table.max_channels() {
            return Err(MuxError::NoChannels);
        }
        candidate = next_id(candidate);
    }
    Ok(candidate)
}

/// The successor of a channel id, wrapping `u32::MAX` to 1.
fn next_id(id: u32) -> u32 {
    id.checked_add(1).unwrap_or(MIN_CHANNEL_ID)
}
