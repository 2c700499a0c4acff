use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{fs, path::Path};

pub const WORKSHOP_ITEM_URL: &str = "https://steamcommunity.com/workshop/filedetails/?id=";

const FETCHING_INFO_PREFIX: &str = "Fetching info for";
const FETCHING_DEPENDENCY_PREFIX: &str = "Fetching dependency";

/// One tracked Workshop item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRecord {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub info: ModInfo,
    #[serde(default)]
    pub is_dependency: bool,
}

impl ModRecord {
    pub fn placeholder(id: &str, is_dependency: bool) -> Self {
        Self {
            id: id.to_string(),
            url: workshop_url(id),
            info: ModInfo::placeholder(id, is_dependency),
            is_dependency,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.info.title.is_empty() {
            &self.url
        } else {
            &self.info.title
        }
    }
}

/// Metadata bag replaced wholesale whenever a fetch completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_app_id"
    )]
    pub app_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub file_size: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub preview_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModInfo {
    pub fn placeholder(id: &str, is_dependency: bool) -> Self {
        let title = if is_dependency {
            format!("{FETCHING_DEPENDENCY_PREFIX} {id}...")
        } else {
            format!("{FETCHING_INFO_PREFIX} {id}...")
        };
        Self {
            title,
            ..Self::default()
        }
    }

    pub fn failed(id: &str, error: impl Into<String>) -> Self {
        Self {
            title: format!("Mod {id}"),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.title.starts_with(FETCHING_INFO_PREFIX)
            || self.title.starts_with(FETCHING_DEPENDENCY_PREFIX)
    }
}

pub fn workshop_url(id: &str) -> String {
    format!("{WORKSHOP_ITEM_URL}{id}")
}

/// Loads the persisted list; a missing file is an empty list.
pub fn load_mods(path: &Path) -> Result<Vec<ModRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut mods: Vec<ModRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    for record in &mut mods {
        if record.url.is_empty() {
            record.url = workshop_url(&record.id);
        }
    }
    Ok(mods)
}

pub fn save_mods(path: &Path, mods: &[ModRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("create data dir")?;
        }
    }
    let raw = serde_json::to_string_pretty(mods).context("serialize mod list")?;
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, raw).context("write mod list temp")?;
    fs::rename(&temp, path).context("finalize mod list")?;
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_u64(&value).unwrap_or(0))
}

// The Steam API reports ids as numbers in some fields and strings in others;
// zero means "no app" for our purposes.
pub(crate) fn lenient_app_id<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_u64(&value).filter(|id| *id != 0))
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
