use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table, value};

#[cfg(feature = "embed_example")]
use rust_embed::RustEmbed;

use crate::colour::parse_css;
use crate::convert::{DEFAULT_QUALITY, ExportFormat};
use crate::extract::ExtractOptions;
use crate::recolour::{ColourPair, Palette, RecolourSettings};
use crate::resize::ResizeMode;
use crate::tile::DEFAULT_TILE_SIZE;

#[cfg(feature = "embed_example")]
#[derive(RustEmbed)]
#[folder = "../"]
#[include = "imagetools.example.toml"]
struct ConfigAssets;

/// Default on-disk config filename
pub const DEFAULT_CONFIG_PATH: &str = "imagetools.toml";

/// Strongly typed representation of the configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub server: Option<Server>,
    pub logging: Option<Logging>,
    #[serde(default)]
    pub recolour: RecolourDefaults,
    #[serde(default)]
    pub extract: ExtractOptions,
    #[serde(default)]
    pub convert: ConvertDefaults,
    #[serde(default)]
    pub resize: ResizeDefaults,
    #[serde(default)]
    pub tile: TileDefaults,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Server {
    pub bind_address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub filter: Option<String>,
}

/// One palette row as written in the file: any CSS colour strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PairEntry {
    pub target: String,
    pub replacement: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RecolourDefaults {
    #[serde(default)]
    pub tolerance: u32,
    #[serde(default)]
    pub multiplier_mode: bool,
    /// Ordered target/replacement rows; empty means the built-in default palette.
    #[serde(default)]
    pub pairs: Vec<PairEntry>,
}

impl RecolourDefaults {
    pub fn settings(&self) -> RecolourSettings {
        RecolourSettings {
            tolerance: self.tolerance,
            multiplier_mode: self.multiplier_mode,
        }
    }

    /// Resolve configured rows into a palette. Rows with an unparseable colour are skipped.
    pub fn palette(&self) -> Palette {
        if self.pairs.is_empty() {
            return Palette::default();
        }
        let mut pairs = Vec::with_capacity(self.pairs.len());
        for entry in &self.pairs {
            match (parse_css(&entry.target), parse_css(&entry.replacement)) {
                (Ok(target), Ok(replacement)) => {
                    tracing::trace!(from=%target, to=%replacement, "resolved palette pair");
                    pairs.push(ColourPair::new(target, replacement));
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(from=%entry.target, to=%entry.replacement, error=%e, "skipping palette pair");
                }
            }
        }
        Palette::new(pairs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConvertDefaults {
    pub format: ExportFormat,
    /// 0-100, used by lossy formats.
    pub quality: u8,
}

impl Default for ConvertDefaults {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            quality: DEFAULT_QUALITY,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ResizeDefaults {
    pub mode: ResizeMode,
    pub lock_aspect_ratio: bool,
}

impl Default for ResizeDefaults {
    fn default() -> Self {
        Self {
            mode: ResizeMode::default(),
            lock_aspect_ratio: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TileDefaults {
    pub tile_size: u32,
}

impl Default for TileDefaults {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

/// Internal manager state kept behind an `Arc<RwLock<_>>`.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    doc: DocumentMut,
}

pub type SharedConfig = Arc<RwLock<ConfigManager>>;

fn section_mut<'a>(doc: &'a mut DocumentMut, name: &str) -> Result<&'a mut Table> {
    doc[name]
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[{name}] is not a table"))
}

impl ConfigManager {
    /// Load existing config file. If the file does not exist, creates it from the embedded example.
    pub async fn load(path: Option<PathBuf>) -> Result<SharedConfig> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !path.exists() {
            #[cfg(feature = "embed_example")]
            {
                if let Some(example_file) = ConfigAssets::get("imagetools.example.toml") {
                    let example_content = std::str::from_utf8(&example_file.data)
                        .with_context(|| "embedded example config is not valid UTF-8")?;

                    fs::write(&path, example_content)
                        .await
                        .with_context(|| format!("writing example config to {}", path.display()))?;

                    println!("Created default config file: {}", path.display());
                } else {
                    bail!(
                        "config file {} not found and embedded example is not available",
                        path.display()
                    );
                }
            }
            #[cfg(not(feature = "embed_example"))]
            {
                bail!("config file {} not found", path.display());
            }
        }

        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(path, &text)
    }

    /// Build a manager from TOML text; `path` is where [`ConfigManager::save`] writes.
    pub fn from_toml(path: PathBuf, text: &str) -> Result<SharedConfig> {
        let doc = text
            .parse::<DocumentMut>()
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(Arc::new(RwLock::new(Self { path, doc })))
    }

    /// Convert current document to strongly typed struct.
    pub async fn to_struct(cfg: &SharedConfig) -> Result<Config> {
        let guard = cfg.read().await;
        let typed: Config = toml_edit::de::from_document(guard.doc.clone())?;
        Ok(typed)
    }

    /// Replace the persisted palette rows.
    pub async fn set_recolour_palette(cfg: &SharedConfig, palette: &Palette) -> Result<()> {
        let mut guard = cfg.write().await;
        let recolour = section_mut(&mut guard.doc, "recolour")?;
        let mut rows = ArrayOfTables::new();
        for pair in &palette.pairs {
            let mut row = Table::new();
            row["target"] = value(pair.target.to_hex());
            row["replacement"] = value(pair.replacement.to_hex());
            rows.push(row);
        }
        recolour["pairs"] = Item::ArrayOfTables(rows);
        Ok(())
    }

    /// Update tolerance / multiplier mode. Only provided values are changed.
    pub async fn set_recolour_settings(
        cfg: &SharedConfig,
        tolerance: Option<u32>,
        multiplier_mode: Option<bool>,
    ) -> Result<()> {
        let mut guard = cfg.write().await;
        let recolour = section_mut(&mut guard.doc, "recolour")?;
        if let Some(t) = tolerance {
            recolour["tolerance"] = value(t as i64);
        }
        if let Some(m) = multiplier_mode {
            recolour["multiplier_mode"] = value(m);
        }
        Ok(())
    }

    /// Replace the extractor tuning block.
    pub async fn set_extract_options(cfg: &SharedConfig, opts: &ExtractOptions) -> Result<()> {
        let mut guard = cfg.write().await;
        let extract = section_mut(&mut guard.doc, "extract")?;
        extract["max_colours"] = value(opts.max_colours as i64);
        extract["min_distance"] = value(opts.min_distance);
        extract["bin_width"] = value(opts.bin_width as i64);
        extract["sample_cap"] = value(opts.sample_cap as i64);
        extract["alpha_threshold"] = value(opts.alpha_threshold as i64);
        extract["max_dimension"] = value(opts.max_dimension as i64);
        Ok(())
    }

    pub async fn set_convert_defaults(
        cfg: &SharedConfig,
        format: Option<ExportFormat>,
        quality: Option<u8>,
    ) -> Result<()> {
        let mut guard = cfg.write().await;
        let convert = section_mut(&mut guard.doc, "convert")?;
        if let Some(f) = format {
            convert["format"] = value(f.extension());
        }
        if let Some(q) = quality {
            if q > 100 {
                bail!("quality {q} out of range 0..=100");
            }
            convert["quality"] = value(q as i64);
        }
        Ok(())
    }

    pub async fn set_resize_defaults(
        cfg: &SharedConfig,
        mode: Option<ResizeMode>,
        lock_aspect_ratio: Option<bool>,
    ) -> Result<()> {
        let mut guard = cfg.write().await;
        let resize = section_mut(&mut guard.doc, "resize")?;
        if let Some(m) = mode {
            resize["mode"] = value(m.as_str());
        }
        if let Some(lock) = lock_aspect_ratio {
            resize["lock_aspect_ratio"] = value(lock);
        }
        Ok(())
    }

    pub async fn set_tile_size(cfg: &SharedConfig, tile_size: u32) -> Result<()> {
        if tile_size == 0 {
            bail!("tile size must be positive");
        }
        let mut guard = cfg.write().await;
        let tile = section_mut(&mut guard.doc, "tile")?;
        tile["tile_size"] = value(tile_size as i64);
        Ok(())
    }

    /// Copy of the current document, used to roll back a batch of edits.
    pub async fn checkpoint(cfg: &SharedConfig) -> DocumentMut {
        cfg.read().await.doc.clone()
    }

    pub async fn restore(cfg: &SharedConfig, doc: DocumentMut) {
        cfg.write().await.doc = doc;
    }

    /// Atomic write of current document to disk (best-effort durability via rename).
    pub async fn save(cfg: &SharedConfig) -> Result<()> {
        let (path, contents) = {
            let guard = cfg.read().await;
            (guard.path.clone(), guard.doc.to_string())
        };
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("writing tmp config {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming tmp config to {}", path.display()))?;
        Ok(())
    }
}
