//! Native messaging wire format between the host and the browser extension.
//!
//! Each frame is a 4-byte length in native byte order followed by that many
//! bytes of UTF-8 JSON.

use std::io::{Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::page::{Tab, TabId, TimerId};

/// Largest message the browser sends to a native host. Anything larger means
/// a corrupt length prefix.
const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Messages sent by the extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    /// A tab finished loading.
    TabUpdated { tab: Tab },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },
    /// A page timer stopped after its generator failed.
    #[serde(rename_all = "camelCase")]
    ScriptFailed {
        tab_id: TabId,
        timer_id: TimerId,
        #[serde(default)]
        error: String,
    },
    /// Reply to a [`Outbound::Request`].
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    Reconcile,
}

/// Messages sent to the extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Request { id: u64, op: PageOp },
}

/// Page-context operations the extension performs on the host's behalf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PageOp {
    QueryTabs,
    #[serde(rename_all = "camelCase")]
    ReadOriginalTitle { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    SetTitle { tab_id: TabId, title: String },
    #[serde(rename_all = "camelCase")]
    RunTitleScript {
        tab_id: TabId,
        script: String,
        interval: u64,
    },
    #[serde(rename_all = "camelCase")]
    StopTimer { tab_id: TabId, timer_id: TimerId },
    #[serde(rename_all = "camelCase")]
    RestoreTitle { tab_id: TabId },
}

impl PageOp {
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            PageOp::QueryTabs => None,
            PageOp::ReadOriginalTitle { tab_id }
            | PageOp::SetTitle { tab_id, .. }
            | PageOp::RunTitleScript { tab_id, .. }
            | PageOp::StopTimer { tab_id, .. }
            | PageOp::RestoreTitle { tab_id } => Some(*tab_id),
        }
    }
}

pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(mut reader: R) -> Result<T, ProtocolError> {
    let len = reader.read_u32::<NativeEndian>()? as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(ProtocolError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    Ok(serde_json::from_slice(&body)?)
}

pub fn write_message<W: Write, T: Serialize>(mut writer: W, msg: &T) -> Result<(), ProtocolError> {
    let msg_str = serde_json::to_string(msg)?;
    let len = u32::try_from(msg_str.len()).map_err(|_| ProtocolError::TooLarge(msg_str.len()))?;

    writer.write_u32::<NativeEndian>(len)?;
    writer.write_all(msg_str.as_bytes())?;
    writer.flush()?;
    Ok(())
}
