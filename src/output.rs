//! Output formatting for scan reports

use crate::error::{Error, Result};
use crate::report::{Component, ComponentKind, CredentialStatus, ScanReport};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL,
};
use std::io::Write;
use std::str::FromStr;

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable table output
    #[default]
    Human,
    /// JSON output
    Json,
    /// No output (silent mode)
    None,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "none" => Ok(Self::None),
            _ => Err(Error::InvalidOutputFormat(s.to_string())),
        }
    }
}

/// Sort order for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSort {
    /// Sort by type (Core, Plugin, Theme, Timthumb, User), then by name (default)
    #[default]
    Type,
    /// Sort alphabetically by name only
    Name,
    /// Vulnerable components first, then by type, then by name
    Status,
}

impl FromStr for OutputSort {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "type" => Ok(Self::Type),
            "name" => Ok(Self::Name),
            "status" => Ok(Self::Status),
            _ => Err(Error::InvalidOutputSort(s.to_string())),
        }
    }
}

/// Configuration for output formatting
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,
    /// Sort order
    pub sort: OutputSort,
}

impl OutputConfig {
    /// Create a new output config
    pub fn new(format: OutputFormat, sort: OutputSort) -> Self {
        Self { format, sort }
    }
}

/// Output the scan report
pub fn output_report<W: Write>(
    report: &ScanReport,
    config: &OutputConfig,
    writer: &mut W,
) -> Result<()> {
    match config.format {
        OutputFormat::Human => output_human(report, config, writer),
        OutputFormat::Json => output_json(report, writer),
        OutputFormat::None => Ok(()),
    }
}

/// Output JSON format
fn output_json<W: Write>(report: &ScanReport, writer: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writeln!(writer).map_err(Error::OutputFailed)?;
    Ok(())
}

fn bold(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold)
}

/// Output human-readable format
fn output_human<W: Write>(report: &ScanReport, config: &OutputConfig, writer: &mut W) -> Result<()> {
    write_findings(report, writer).map_err(Error::OutputFailed)?;

    let mut components: Vec<&Component> = report.components.iter().collect();
    match config.sort {
        // Components are already ordered by kind, then slug
        OutputSort::Type => {}
        OutputSort::Name => components.sort_by(|a, b| a.slug.cmp(&b.slug)),
        OutputSort::Status => components.sort_by(|a, b| {
            b.is_vulnerable()
                .cmp(&a.is_vulnerable())
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| a.slug.cmp(&b.slug))
        }),
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            bold("Type"),
            bold("Name"),
            bold("Version"),
            bold("Confidence"),
            bold("Vulnerabilities"),
        ]);
    for component in &components {
        add_component_row(&mut table, component);
    }
    writeln!(writer, "{}", table).map_err(Error::OutputFailed)?;

    write_vulnerabilities(&components, writer)?;
    write_credentials(report, writer)?;

    if report.interrupted {
        writeln!(writer, "[!] Scan interrupted, results are partial").map_err(Error::OutputFailed)?;
    }
    Ok(())
}

fn write_findings<W: Write>(report: &ScanReport, writer: &mut W) -> std::io::Result<()> {
    let findings = &report.findings;
    writeln!(writer, "[+] URL: {}", report.url)?;

    for (name, value) in &findings.interesting_headers {
        writeln!(writer, "[+] Interesting header: {}: {}", name, value)?;
    }
    if let Some(url) = &findings.robots_url {
        writeln!(writer, "[+] robots.txt available under: {}", url)?;
        for entry in &findings.robots_entries {
            writeln!(writer, "    | {}", entry)?;
        }
    }
    if let Some(url) = &findings.readme_url {
        writeln!(writer, "[!] The WordPress readme file exists: {}", url)?;
    }
    if let Some(url) = &findings.xml_rpc_url {
        writeln!(writer, "[+] XML-RPC interface available under: {}", url)?;
    }
    if let Some(url) = &findings.full_path_disclosure_url {
        writeln!(writer, "[!] Full path disclosure: {}", url)?;
    }
    if let Some(url) = &findings.debug_log_url {
        writeln!(writer, "[!] Debug log file found: {}", url)?;
    }
    for url in &findings.config_backups {
        writeln!(writer, "[!] A wp-config.php backup file has been found: {}", url)?;
    }
    if let Some(url) = &findings.search_replace_db_url {
        writeln!(writer, "[!] searchreplacedb2.php has been found: {}", url)?;
    }
    if findings.multisite {
        writeln!(writer, "[+] This site seems to be a multisite")?;
    }
    if findings.registration_enabled {
        writeln!(writer, "[+] Registration is enabled")?;
    }
    if let Some(plugin) = &findings.login_protection {
        writeln!(writer, "[!] Login protection plugin detected: {}", plugin)?;
    }
    if !findings.malwares.is_empty() {
        writeln!(writer, "[!] {} malware(s) found:", findings.malwares.len())?;
        for url in &findings.malwares {
            writeln!(writer, "    | {}", url)?;
        }
    }
    writeln!(writer)
}

/// Add a row for a component to the table
fn add_component_row(table: &mut Table, component: &Component) {
    let vulns = component.vulnerabilities.len();
    let possible = component.possible_vulnerabilities.len();
    let vuln_cell = match (vulns, possible) {
        (0, 0) => Cell::new("None").fg(Color::Green),
        (0, p) => Cell::new(format!("{} possible", p)).fg(Color::Yellow),
        (v, 0) => Cell::new(v.to_string()).fg(Color::Red),
        (v, p) => Cell::new(format!("{} (+{} possible)", v, p)).fg(Color::Red),
    };

    let version_cell = match (&component.version, component.kind) {
        (_, ComponentKind::User) => Cell::new("-").fg(Color::DarkGrey),
        (Some(version), _) => Cell::new(version),
        (None, _) => Cell::new("Unknown").fg(Color::DarkGrey),
    };

    table.add_row(vec![
        Cell::new(component.kind.to_string()),
        Cell::new(&component.slug),
        version_cell,
        Cell::new(format!("{}%", component.confidence)).set_alignment(CellAlignment::Right),
        vuln_cell.set_alignment(CellAlignment::Center),
    ]);
}

fn write_vulnerabilities<W: Write>(components: &[&Component], writer: &mut W) -> Result<()> {
    let vulnerable: Vec<&&Component> = components.iter().filter(|c| c.is_vulnerable()).collect();
    if vulnerable.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![bold("Component"), bold("Id"), bold("Title"), bold("Affected"), bold("References")]);

    for component in vulnerable {
        let name = format!("{} {}", component.kind, component.slug);
        let rows = component
            .vulnerabilities
            .iter()
            .map(|r| (r, Color::Red))
            .chain(component.possible_vulnerabilities.iter().map(|r| (r, Color::Yellow)));
        for (record, color) in rows {
            table.add_row(vec![
                Cell::new(&name),
                Cell::new(&record.id),
                Cell::new(&record.title).fg(color),
                Cell::new(record.affected.to_string()),
                Cell::new(record.references.join("\n")),
            ]);
        }
    }

    writeln!(writer, "{}", table).map_err(Error::OutputFailed)
}

fn write_credentials<W: Write>(report: &ScanReport, writer: &mut W) -> Result<()> {
    if report.credentials.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![bold("Username"), bold("Password"), bold("Status")]);

    for credential in &report.credentials {
        let status = match credential.status {
            CredentialStatus::Valid => Cell::new("Valid").fg(Color::Red),
            CredentialStatus::Error => Cell::new("Error").fg(Color::Yellow),
            CredentialStatus::Invalid => Cell::new("Invalid").fg(Color::DarkGrey),
            CredentialStatus::Untested => Cell::new("Untested").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&credential.username),
            Cell::new(&credential.password),
            status.set_alignment(CellAlignment::Center),
        ]);
    }

    writeln!(writer, "{}", table).map_err(Error::OutputFailed)
}
