//! HTTP/2 client preface parameters (SETTINGS and connection WINDOW_UPDATE).

use crate::transport::h2::frame::SettingsId;

/// Stream receive window advertised in SETTINGS_INITIAL_WINDOW_SIZE.
pub const DEFAULT_STREAM_WINDOW: u32 = 4 << 20;

/// Increment sent in the connection-level WINDOW_UPDATE after SETTINGS.
pub const DEFAULT_CONN_WINDOW_INCREMENT: u32 = 1 << 30;

/// Largest header list we accept from the peer.
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 10 << 20;

/// HPACK table size used by our decoder.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// HTTP/2 SETTINGS we send. `None` entries are left out of the frame and
/// keep their protocol defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: u32,
    /// Connection-level WINDOW_UPDATE sent right after SETTINGS. 0 sends none.
    pub connection_window_increment: u32,
}

impl Default for Http2Settings {
    fn default() -> Self {
        Self {
            header_table_size: None,
            enable_push: false,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_STREAM_WINDOW,
            max_frame_size: None,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            connection_window_increment: DEFAULT_CONN_WINDOW_INCREMENT,
        }
    }
}

impl Http2Settings {
    /// Chrome's preface values.
    pub fn chrome() -> Self {
        Self {
            header_table_size: Some(65536),
            enable_push: false,
            max_concurrent_streams: Some(1000),
            initial_window_size: 6291456,
            max_frame_size: None,
            max_header_list_size: 262144,
            connection_window_increment: 15663105,
        }
    }

    /// Settings in wire order.
    pub fn to_frame_settings(&self) -> Vec<(u16, u32)> {
        let mut out = Vec::with_capacity(6);
        if let Some(size) = self.header_table_size {
            out.push((SettingsId::HeaderTableSize.into(), size));
        }
        out.push((SettingsId::EnablePush.into(), u32::from(self.enable_push)));
        if let Some(max) = self.max_concurrent_streams {
            out.push((SettingsId::MaxConcurrentStreams.into(), max));
        }
        out.push((SettingsId::InitialWindowSize.into(), self.initial_window_size));
        if let Some(size) = self.max_frame_size {
            out.push((SettingsId::MaxFrameSize.into(), size));
        }
        out.push((SettingsId::MaxHeaderListSize.into(), self.max_header_list_size));
        out
    }

    /// HPACK table size our decoder is prepared to hold.
    pub fn decoder_table_size(&self) -> usize {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE) as usize
    }
}
