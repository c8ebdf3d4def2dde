use std::sync::Arc;

use anyhow::Result;
use plugboard_core::config::ServicePluginConfig;
use plugboard_core::{CapabilityDescriptor, UpstreamError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::http::ServiceClient;
use crate::{typed_handler, Capability, NoArguments, Plugin};

pub const PLUGIN_NAME: &str = "notes";

/// Stop following `nextPageToken` after this many pages.
pub const MAX_PAGES: usize = 20;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub update_time: String,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub body: Option<NoteBody>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListContent>,
}

/// Keep wraps text as `{ "text": ".." }`; a bare string is accepted as well.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextContent {
    Plain(String),
    Wrapped { text: String },
}

impl TextContent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Wrapped { text } => text,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContent {
    #[serde(default)]
    pub list_items: Vec<ListItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub text: Option<TextContent>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_list_items: Vec<ListItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesPage {
    #[serde(default)]
    pub notes: Vec<Note>,
    pub next_page_token: Option<String>,
}

pub struct NotesPlugin {
    client: ServiceClient,
}

impl NotesPlugin {
    pub fn from_config(config: &ServicePluginConfig) -> Result<Self, UpstreamError> {
        Ok(Self { client: ServiceClient::from_config(PLUGIN_NAME, config)? })
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>, UpstreamError> {
        let mut notes = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut request = self.client.get("notes");
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }

            let page: NotesPage = self.client.send_json(request).await?;
            notes.extend(page.notes);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => {
                    info!(event_name = "plugin.notes.listed", notes = notes.len(), "notes listed");
                    return Ok(notes);
                }
            }
        }

        warn!(
            event_name = "plugin.notes.page_limit",
            notes = notes.len(),
            pages = MAX_PAGES,
            "stopped following note pages"
        );
        Ok(notes)
    }
}

impl Plugin for NotesPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![(
            CapabilityDescriptor::new("list_notes", "Lists all notes from Google Keep."),
            typed_handler(&self, |plugin: Arc<Self>, _: NoArguments| async move {
                anyhow::Ok(serde_json::to_value(plugin.list_notes().await?)?)
            }),
        )]
    }
}
