// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Sync v3 Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The sync v3 engine: sortable room snapshots, the sorted list, tracked
//   ranges, per-connection diff state, the connection registry and the
//   event fan-in between them.
//
// =============================================================================

pub mod conn;
pub mod connmap;
pub mod connstate;
pub mod events;
pub mod ranges;
pub mod request;
pub mod response;
pub mod room;
pub mod sorted_list;

pub use conn::{Conn, ConnId};
pub use connmap::ConnMap;
pub use connstate::ConnState;
pub use events::{EventData, FAN_IN_CAPACITY};
pub use ranges::SliceRanges;
pub use request::Request;
pub use response::{Response, ResponseOp};
pub use room::{Room, RoomSubscription, SortableRoom};
pub use sorted_list::{SortCriterion, SortedRoomList};
