//! Dashboard shell: panel selection, auth gate, and map mounting.
//!
//! The dashboard does no rendering of its own. It decides which panels are
//! visible, refuses to open without a signed-in user, and hands the map
//! viewport to whatever [`MapProvider`] it was given.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::config::MapConfig;
use crate::error::{ChatError, Result};

/// Dashboard panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Panel {
    /// Chat and map side by side.
    #[default]
    All,
    Chat,
    Map,
    Settings,
}

impl Panel {
    /// Every panel, in navigation order.
    pub const NAVIGATION: [Panel; 4] = [Panel::All, Panel::Chat, Panel::Map, Panel::Settings];

    /// Header title for the panel.
    pub fn title(self) -> &'static str {
        match self {
            Self::All => "Home",
            Self::Chat => "Chatbot",
            Self::Map => "Map",
            Self::Settings => "Settings",
        }
    }

    /// Look a panel up by its navigation title.
    pub fn from_title(title: &str) -> Option<Self> {
        Self::NAVIGATION.into_iter().find(|p| p.title() == title)
    }

    pub fn shows_chat(self) -> bool {
        matches!(self, Self::All | Self::Chat)
    }

    pub fn shows_map(self) -> bool {
        matches!(self, Self::All | Self::Map)
    }
}

/// Initial map view handed to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct MapViewport {
    /// `[longitude, latitude]`.
    pub center: [f64; 2],
    pub zoom: f64,
    pub style: String,
    pub navigation_controls: bool,
    /// Add a directions control (only when the provider supports it).
    pub directions: bool,
}

impl MapViewport {
    pub fn from_config(config: &MapConfig, directions: bool) -> Self {
        Self {
            center: config.center,
            zoom: config.zoom,
            style: config.style.clone(),
            navigation_controls: true,
            directions,
        }
    }
}

/// Map widget capability, injected rather than looked up globally.
#[async_trait]
pub trait MapProvider: Send + Sync {
    /// Create a map showing `viewport`.
    async fn mount(&self, viewport: &MapViewport) -> Result<()>;

    /// Whether the provider can show turn-by-turn directions.
    fn supports_directions(&self) -> bool {
        false
    }
}

/// Provider for environments with nothing to draw on; logs the viewport.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessMap;

#[async_trait]
impl MapProvider for HeadlessMap {
    async fn mount(&self, viewport: &MapViewport) -> Result<()> {
        info!(
            lon = viewport.center[0],
            lat = viewport.center[1],
            zoom = viewport.zoom,
            style = %viewport.style,
            "map mounted"
        );
        Ok(())
    }
}

/// An opened dashboard for one signed-in user.
pub struct Dashboard {
    user_id: String,
    panel: Panel,
    viewport: MapViewport,
    map: Arc<dyn MapProvider>,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("user_id", &self.user_id)
            .field("panel", &self.panel)
            .finish()
    }
}

impl Dashboard {
    /// Open the dashboard on the home panel.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotAuthorized`] when nobody is signed in. A map
    /// that fails to mount is logged and does not prevent opening.
    pub async fn open(
        auth: &dyn AuthProvider,
        map: Arc<dyn MapProvider>,
        config: &MapConfig,
    ) -> Result<Self> {
        let Some(user_id) = auth.current_user().await else {
            warn!("dashboard opened without a signed-in user");
            return Err(ChatError::NotAuthorized);
        };
        let viewport = MapViewport::from_config(config, map.supports_directions());
        let dashboard = Self {
            user_id,
            panel: Panel::default(),
            viewport,
            map,
        };
        dashboard.mount_map().await;
        Ok(dashboard)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn panel(&self) -> Panel {
        self.panel
    }

    /// Header title for the current panel.
    pub fn title(&self) -> &'static str {
        self.panel.title()
    }

    pub fn viewport(&self) -> &MapViewport {
        &self.viewport
    }

    /// Switch panels, mounting a fresh map if it just became visible.
    pub async fn navigate(&mut self, panel: Panel) {
        let map_was_visible = self.panel.shows_map();
        self.panel = panel;
        debug!(panel = panel.title(), "panel changed");
        if panel.shows_map() && !map_was_visible {
            self.mount_map().await;
        }
    }

    async fn mount_map(&self) {
        if let Err(e) = self.map.mount(&self.viewport).await {
            warn!(error = %e, "map unavailable");
        }
    }
}
