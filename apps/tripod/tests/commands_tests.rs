//! Integration tests for the tripod CLI commands.
//!
//! Each test works on its own redb file in a temporary directory.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tripod::cli::{Cli, CliError, StatementJson, execute};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const PEOPLE: &str = r#"{"subject":"http://ex.org/alice","predicate":"http://www.w3.org/1999/02/22-rdf-syntax-ns#type","object":"http://ex.org/Person"}
{"subject":"http://ex.org/alice","predicate":"http://ex.org/name","object":"Alice","literal":true}
{"subject":"http://ex.org/alice","predicate":"http://ex.org/age","object":"42","datatype":"xsd:integer"}

{"subject":"http://ex.org/bob","predicate":"http://ex.org/knows","object":"<http://ex.org/alice>"}
"#;

const ROLES: &str = r#"
[[role]]
name = "Agent"
type = "http://ex.org/Agent"

[[role]]
name = "Person"
type = "http://ex.org/Person"
extends = ["Agent"]

[[role]]
name = "Employee"
type = "http://ex.org/Employee"
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("people.jsonl"), PEOPLE).unwrap();
        std::fs::write(dir.path().join("roles.toml"), ROLES).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn run(&self, args: &[&str]) -> Result<String, CliError> {
        let db = self.path("test.redb");
        let roles = self.path("roles.toml");
        let mut argv: Vec<String> = vec![
            "tripod".to_string(),
            "-D".to_string(),
            db.display().to_string(),
            "--roles".to_string(),
            roles.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        let cli = Cli::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        execute(cli, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let mut with_json = vec!["--json-mode"];
        with_json.extend_from_slice(args);
        serde_json::from_str(&self.run(&with_json).unwrap()).unwrap()
    }

    fn imported() -> Self {
        let ws = Self::new();
        let input = ws.path("people.jsonl");
        ws.run(&["import", "-i", path_str(&input)]).unwrap();
        ws
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

// =============================================================================
// STATUS / IMPORT / EXPORT
// =============================================================================

#[test]
fn test_status_on_fresh_database() {
    let ws = Workspace::new();
    let status = ws.json(&["status"]);
    assert_eq!(status["statements"], 0);
    assert!(status["namespaces"].as_u64().unwrap() >= 4);
    assert_eq!(status["roles"].as_array().unwrap().len(), 3);
}

#[test]
fn test_import_counts_new_statements() {
    let ws = Workspace::new();
    let input = ws.path("people.jsonl");

    let first = ws.json(&["import", "-i", path_str(&input)]);
    assert_eq!(first["read"], 4);
    assert_eq!(first["added"], 4);

    let again = ws.json(&["import", "-i", path_str(&input)]);
    assert_eq!(again["added"], 0);
    assert_eq!(ws.json(&["status"])["statements"], 4);
}

#[test]
fn test_import_reports_bad_line() {
    let ws = Workspace::new();
    let input = ws.path("bad.jsonl");
    std::fs::write(
        &input,
        "{\"subject\":\"http://ex.org/a\",\"predicate\":\"http://ex.org/p\",\"object\":\"x\",\"literal\":true}\nnot json\n",
    )
    .unwrap();

    match ws.run(&["import", "-i", path_str(&input)]) {
        Err(CliError::Input { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected input error, got {:?}", other),
    }
    assert_eq!(ws.json(&["status"])["statements"], 0);
}

#[test]
fn test_export_round_trips_through_import() {
    let ws = Workspace::imported();
    let output = ws.path("out.jsonl");
    let exported = ws.json(&["export", "-o", path_str(&output)]);
    assert_eq!(exported["exported"], 4);

    let lines: Vec<StatementJson> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert!(
        lines
            .iter()
            .any(|l| l.object == "42" && l.datatype.as_deref() == Some("http://www.w3.org/2001/XMLSchema#integer"))
    );

    let fresh = Workspace::new();
    let copied = fresh.json(&["import", "-i", path_str(&output)]);
    assert_eq!(copied["added"], 4);
}

// =============================================================================
// NAMESPACES AND INSPECTION
// =============================================================================

#[test]
fn test_namespace_register_and_resolve() {
    let ws = Workspace::imported();
    ws.run(&["namespace", "ex", "http://ex.org/"]).unwrap();

    let listed = ws.json(&["namespace", "ex"]);
    assert_eq!(listed["ex"], "http://ex.org/");

    let types = ws.json(&["types", "ex:alice"]);
    assert_eq!(types["types"][0], "http://ex.org/Person");
}

#[test]
fn test_unknown_prefix_is_an_error() {
    let ws = Workspace::new();
    assert!(ws.run(&["namespace", "nope"]).is_err());
    assert!(ws.run(&["types", "9nope:thing"]).is_err());
}

#[test]
fn test_describe_shows_roles_and_properties() {
    let ws = Workspace::imported();
    let described = ws.json(&["describe", "http://ex.org/alice"]);

    let roles: Vec<&str> = described["roles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap())
        .collect();
    assert!(roles.contains(&"Person"));
    assert!(roles.contains(&"Agent"));
    assert_eq!(
        described["properties"]["http://ex.org/name"][0],
        "\"Alice\"^^<http://www.w3.org/2001/XMLSchema#string>"
    );
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_designate_and_retract_role() {
    let ws = Workspace::imported();

    let designated = ws.json(&["designate", "http://ex.org/alice", "Employee"]);
    let roles = designated["roles"].as_array().unwrap();
    assert!(roles.iter().any(|r| r == "Employee"));

    let types = ws.json(&["types", "http://ex.org/alice"]);
    assert_eq!(types["types"].as_array().unwrap().len(), 2);

    let retracted = ws.json(&["designate", "--retract", "http://ex.org/alice", "Employee"]);
    assert!(!retracted["roles"].as_array().unwrap().iter().any(|r| r == "Employee"));
}

#[test]
fn test_designate_with_type_iri() {
    let ws = Workspace::imported();
    ws.json(&["designate", "http://ex.org/bob", "http://ex.org/Robot"]);
    let types = ws.json(&["types", "http://ex.org/bob"]);
    assert_eq!(types["types"][0], "http://ex.org/Robot");
}

#[test]
fn test_rename_moves_every_mention() {
    let ws = Workspace::imported();
    let renamed = ws.json(&["rename", "http://ex.org/alice", "http://ex.org/alicia"]);
    assert_eq!(renamed["to"], "<http://ex.org/alicia>");

    assert_eq!(ws.json(&["types", "http://ex.org/alice"])["types"].as_array().unwrap().len(), 0);
    let bob = ws.json(&["describe", "http://ex.org/bob"]);
    assert_eq!(bob["properties"]["http://ex.org/knows"][0], "<http://ex.org/alicia>");
    assert_eq!(ws.json(&["status"])["statements"], 4);
}

#[test]
fn test_remove_deletes_incoming_and_outgoing() {
    let ws = Workspace::imported();
    let removed = ws.json(&["remove", "http://ex.org/alice"]);
    assert_eq!(removed["removed"], 4);
    assert_eq!(ws.json(&["status"])["statements"], 0);
}

#[test]
fn test_text_output_for_status() {
    let ws = Workspace::imported();
    let text = ws.run(&["status"]).unwrap();
    assert!(text.contains("Statements:   4"));
    assert!(text.contains("Cache layers: eager"));
}
