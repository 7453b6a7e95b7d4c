//! Writing collection results to TXT, CSV and JSON files

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::collector::{CollectionResult, CollectionStats, Member, Method};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Csv,
    Json,
    All,
}

impl ExportFormat {
    /// Concrete file formats this choice expands to.
    pub fn expand(self) -> Vec<ExportFormat> {
        match self {
            ExportFormat::All => vec![ExportFormat::Txt, ExportFormat::Csv, ExportFormat::Json],
            other => vec![other],
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::All => "all",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "txt" => Ok(ExportFormat::Txt),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "all" => Ok(ExportFormat::All),
            other => Err(Error::InvalidArgument(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }
}

/// CSV row; phone numbers are never part of the output.
#[derive(Debug, Serialize)]
struct MemberRow<'a> {
    id: i64,
    username: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    is_bot: bool,
    is_deleted: bool,
    premium: bool,
    verified: bool,
    scam: bool,
    fake: bool,
    method: &'a str,
}

impl<'a> From<&'a Member> for MemberRow<'a> {
    fn from(member: &'a Member) -> Self {
        Self {
            id: member.id,
            username: member.username.as_deref().unwrap_or(""),
            first_name: &member.first_name,
            last_name: &member.last_name,
            is_bot: member.is_bot,
            is_deleted: member.is_deleted,
            premium: member.premium,
            verified: member.verified,
            scam: member.scam,
            fake: member.fake,
            method: member.method.as_ref().map(Method::as_str).unwrap_or(""),
        }
    }
}

/// Write `result` in `format` under `dir`, returning the files written.
pub fn export(
    result: &CollectionResult,
    format: ExportFormat,
    dir: &Path,
    base_name: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for fmt in format.expand() {
        let path = dir.join(format!("{}.{}", base_name, fmt.extension()));
        match fmt {
            ExportFormat::Txt => fs::write(&path, render_txt(result))?,
            ExportFormat::Csv => write_csv(&path, &result.members)?,
            ExportFormat::Json => fs::write(&path, serde_json::to_string_pretty(result)?)?,
            ExportFormat::All => continue,
        }
        info!("Saved {} ({})", path.display(), format_file_size(&path));
        written.push(path);
    }
    Ok(written)
}

/// Header, count, then one handle per line.
pub fn render_txt(result: &CollectionResult) -> String {
    let methods: Vec<&str> = result
        .stats
        .per_method
        .keys()
        .map(Method::as_str)
        .collect();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# {} ({}) via {}",
        result.channel.title,
        result
            .channel
            .username
            .as_deref()
            .map(|u| format!("@{}", u))
            .unwrap_or_else(|| format!("id {}", result.channel.id)),
        if methods.is_empty() {
            "-".to_string()
        } else {
            methods.join(", ")
        }
    );
    let _ = writeln!(out, "# members: {}", result.members.len());
    for member in &result.members {
        let _ = writeln!(out, "{}", member.handle());
    }
    out
}

fn write_csv(path: &Path, members: &[Member]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if members.is_empty() {
        writer.write_record([
            "id",
            "username",
            "first_name",
            "last_name",
            "is_bot",
            "is_deleted",
            "premium",
            "verified",
            "scam",
            "fake",
            "method",
        ])?;
    }
    for member in members {
        writer.serialize(MemberRow::from(member))?;
    }
    writer.flush()?;
    Ok(())
}

/// `parsed_<channel>_<YYYYmmdd_HHMMSS>` with unsafe characters replaced.
pub fn base_file_name(channel: &str, now: DateTime<Local>) -> String {
    let safe: String = channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("parsed_{}_{}", safe, now.format("%Y%m%d_%H%M%S"))
}

/// Thousands separated with commas.
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1} sec", secs)
    } else if secs < 3600.0 {
        format!("{:.1} min", secs / 60.0)
    } else {
        format!("{:.1} h", secs / 3600.0)
    }
}

pub fn format_file_size(path: &Path) -> String {
    let Ok(meta) = fs::metadata(path) else {
        return "unknown".to_string();
    };
    let mut size = meta.len() as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

/// Human summary sent along with the exported files.
pub fn stats_summary(stats: &CollectionStats, duration: Duration) -> String {
    let base = stats.total.max(1) as f64;
    let primary = stats.count(Method::Participants);
    let extra = stats.count(Method::Messages)
        + stats.count(Method::Comments)
        + stats.count(Method::Reactions);

    let mut out = String::new();
    let _ = writeln!(out, "Collection summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "Members collected: {}", format_number(stats.total));
    let _ = writeln!(out, "Unique: {}", format_number(stats.unique));
    let _ = writeln!(out, "Time: {}", format_duration(duration));
    let _ = writeln!(out);
    for method in Method::ALL {
        let _ = writeln!(
            out,
            "{}: {}",
            method,
            format_number(stats.count(method))
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Participants share: {:.1}%", primary as f64 / base * 100.0);
    let _ = writeln!(out, "Other methods share: {:.1}%", extra as f64 / base * 100.0);
    if stats.flood_waits > 0 {
        let _ = writeln!(
            out,
            "Flood waits: {} ({})",
            stats.flood_waits,
            format_duration(Duration::from_secs(stats.flood_wait_secs))
        );
    }
    if !stats.failed.is_empty() {
        let failed: Vec<&str> = stats.failed.iter().map(Method::as_str).collect();
        let _ = writeln!(out, "Failed methods: {}", failed.join(", "));
    }
    out
}

/// Remove files, logging but not failing on errors.
pub fn cleanup_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            tracing::warn!("Failed to remove {}: {}", path.display(), err);
        }
    }
}
