//! CLI command implementations.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use trellis_client::{ClientConfig, GraphClient};
use trellis_core::GraphParser;
use trellis_graph::{DirectoryEntry, GraphStats, NormalizedGraph, PathRow};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Location of the user config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("trellis").join("config.json"))
}

/// Resolves the config: an explicit file must exist, the default file is
/// optional.
fn load_config(explicit: Option<&Path>) -> Result<ClientConfig> {
    if let Some(path) = explicit {
        return Ok(ClientConfig::load(path)?);
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Loading config from {}", path.display());
            Ok(ClientConfig::load(&path)?)
        }
        _ => Ok(ClientConfig::default()),
    }
}

/// Writes the default config to `path` unless a file is already there.
///
/// Returns false when nothing was written.
fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&ClientConfig::default())?)?;
    Ok(true)
}

/// Write the default config file.
pub fn init(explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or("no config directory on this platform")?,
    };

    if write_default_config(&path)? {
        println!("{} Wrote {}", "✓".green(), path.display());
        println!("  Run {} to start watching", "trellis watch <PUBLIC_KEY>".cyan());
    } else {
        println!("{} Already initialized ({})", "✓".green(), path.display());
    }

    Ok(())
}

/// Subscribe to a public key and print every snapshot.
pub async fn watch(
    config_path: Option<&Path>,
    url: Option<String>,
    public_key: &str,
    directory_id: &str,
    ranking_filter: u8,
    once: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(url) = url {
        config.url = url;
    }
    config.validate()?;

    info!("Watching {} on {}", public_key, config.url);
    let client = GraphClient::new(config);
    let (_subscription, mut updates) =
        client.subscribe_channel(public_key, directory_id, ranking_filter)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(format!("Waiting for the graph of {}...", public_key));
    let mut spinner = Some(spinner);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(graph) = update else {
                    break;
                };
                if let Some(spinner) = spinner.take() {
                    spinner.finish_and_clear();
                }

                if json {
                    println!("{}", render_json(&graph)?);
                } else {
                    print!("{}", render_listing(&graph));
                }

                if once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    client.close();

    Ok(())
}

/// Parse a graph description file and print it.
pub fn parse(file: &Path, root: &str, ranking_filter: u8, json: bool) -> Result<()> {
    let parsed = GraphParser::parse_file(file, root, ranking_filter)?;
    let graph = NormalizedGraph::from_raw(parsed.into_raw(root));

    if json {
        println!("{}", render_json(&graph)?);
    } else if graph.node_count() == 0 {
        println!("No identities in {} at {}%", file.display(), ranking_filter);
    } else {
        print!("{}", render_listing(&graph));
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotOutput<'a> {
    public_key: &'a str,
    stats: GraphStats,
    entries: Vec<DirectoryEntry>,
    paths: Vec<PathRow>,
}

fn render_json(graph: &NormalizedGraph) -> Result<String> {
    let output = SnapshotOutput {
        public_key: graph.public_key(),
        stats: graph.stats(),
        entries: graph.entries(),
        paths: graph.paths(),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Directory listing followed by the path table.
fn render_listing(graph: &NormalizedGraph) -> String {
    let mut out = String::new();
    let stats = graph.stats();
    let root = graph.public_key();

    let _ = writeln!(
        out,
        "\n{} {} ({} identities, {} links)",
        "Directory of".bold(),
        root.cyan(),
        stats.node_count,
        stats.link_count
    );
    if stats.pubkey_collisions > 0 {
        let _ = writeln!(
            out,
            "{} {} duplicate public keys ignored",
            "⚠".yellow(),
            stats.pubkey_collisions
        );
    }

    for entry in graph.entries() {
        let marker = if entry.pubkey == root { "★" } else { " " };
        let _ = writeln!(
            out,
            "  {} {:<32} {:>6.1}%  {}",
            marker.yellow(),
            entry.display_name,
            entry.attention_pct,
            format!("in {} out {}", entry.incoming_count, entry.outgoing_count).dimmed()
        );
        if let Some(memo) = &entry.memo {
            let _ = writeln!(out, "      {}", memo.dimmed());
        }
    }

    let paths = graph.paths();
    if !paths.is_empty() {
        let _ = writeln!(out, "\n{}", "Paths".bold());
        for row in paths {
            let mut detail = format!("weight {}", row.link.value);
            if let Some(height) = row.link.height {
                let _ = write!(detail, " height {}", height);
            }
            if let Some(time) = row.link.time {
                let _ = write!(detail, " time {}", time);
            }
            let _ = writeln!(out, "  {} → {}  {}", row.from, row.to, detail.dimmed());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};
    use trellis_core::{Link, Node, RawGraph};

    fn sample() -> NormalizedGraph {
        NormalizedGraph::from_raw(RawGraph::new(
            "root",
            vec![
                Node::new(0, "root").with_ranking(0.1).with_label("Me"),
                Node::new(1, "friend").with_ranking(0.6).with_memo("met at the meetup"),
            ],
            vec![Link::new(0, 1).with_value(2.0).at(11, 1001)],
        ))
    }

    #[test]
    fn test_listing_shows_entries_and_paths() {
        colored::control::set_override(false);
        let listing = render_listing(&sample());

        assert!(listing.contains("Directory of root (2 identities, 1 links)"));
        assert!(listing.contains("Me"));
        assert!(listing.contains("60.0%"));
        assert!(listing.contains("met at the meetup"));
        assert!(listing.contains("Me → friend  weight 2 height 11 time 1001"));
    }

    #[test]
    fn test_json_output() {
        let value: Value = serde_json::from_str(&render_json(&sample()).unwrap()).unwrap();

        assert_eq!(value["publicKey"], "root");
        assert_eq!(value["stats"]["node_count"], 2);
        assert_eq!(value["entries"][0]["displayName"], "Me");
        assert_eq!(value["entries"][1]["incomingCount"], 1);
        assert_eq!(value["paths"][0]["to"], "friend");
    }

    #[test]
    fn test_write_default_config_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_load_explicit_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"url": "ws://node:8831", "send_cancellations": true}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.url, "ws://node:8831");
        assert!(config.send_cancellations);
    }

    #[test]
    fn test_load_explicit_config_missing() {
        assert!(load_config(Some(Path::new("/nonexistent/trellis.json"))).is_err());
    }

    #[test]
    fn test_parse_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"digraph {{ 0 [pubkey="root"]; 1 [pubkey="a", ranking="0.9"]; 0 -> 1; }}"#
        )
        .unwrap();

        assert!(parse(file.path(), "root", 50, true).is_ok());
        assert!(parse(Path::new("/nonexistent/graph.dot"), "root", 50, false).is_err());
    }
}
