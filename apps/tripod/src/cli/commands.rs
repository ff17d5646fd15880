//! # CLI Command Implementations
//!
//! Every command opens one session over the repository, does its work and
//! closes the session. Results go to the caller's writer, as text or as
//! pretty-printed JSON.

use super::{CliError, RoleFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tripod_core::{
    EngineConfig, EngineError, Iri, Literal, RdfType, RedbRepository, Repository, Resource,
    Session, SessionFactory, Statement, StatementPattern, StoreConnection, Term, TypeSet,
    in_transaction,
};

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum size of an import file (100 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CliError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CliError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CliError::Io(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path, which must be an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CliError> {
    let canonical = path.canonicalize().map_err(|e| {
        CliError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CliError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Resolve an output path whose parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, CliError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CliError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    let filename = path
        .file_name()
        .ok_or_else(|| CliError::Io("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

// =============================================================================
// CONTEXT
// =============================================================================

/// The repository and session factory shared by one CLI invocation.
pub struct Context {
    repository: Arc<RedbRepository>,
    factory: SessionFactory,
}

impl Context {
    /// Open the database and build the session factory.
    pub fn open(
        database: &Path,
        config: Option<&Path>,
        roles: Option<&Path>,
    ) -> Result<Self, CliError> {
        let config = match config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        let registry = match roles {
            Some(path) => RoleFile::load(path)?.into_registry(),
            None => RoleFile::default().into_registry(),
        };

        let repository = Arc::new(RedbRepository::open(database)?);
        let shared: Arc<dyn Repository> = Arc::clone(&repository) as Arc<dyn Repository>;
        let factory = SessionFactory::new(shared, Arc::new(registry)).with_config(config);
        Ok(Self {
            repository,
            factory,
        })
    }

    pub fn repository(&self) -> &RedbRepository {
        &self.repository
    }

    pub fn session(&self) -> Result<Session, CliError> {
        Ok(self.factory.open()?)
    }
}

// =============================================================================
// STATEMENT JSON
// =============================================================================

/// One statement in the import/export format.
///
/// Resources are written as `<iri>` or `_:label`; on import any name the
/// session can resolve is accepted. An object is a literal when `literal`
/// is set or a datatype or language is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementJson {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub literal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl From<&Statement> for StatementJson {
    fn from(st: &Statement) -> Self {
        match &st.object {
            Term::Resource(object) => Self {
                subject: st.subject.to_string(),
                predicate: Resource::Named(st.predicate.clone()).to_string(),
                object: object.to_string(),
                literal: false,
                datatype: None,
                language: None,
            },
            Term::Literal(literal) => Self {
                subject: st.subject.to_string(),
                predicate: Resource::Named(st.predicate.clone()).to_string(),
                object: literal.lexical.clone(),
                literal: true,
                datatype: match literal.language {
                    Some(_) => None,
                    None => Some(literal.datatype.to_string()),
                },
                language: literal.language.clone(),
            },
        }
    }
}

fn resolve_iri(session: &Session, name: &str) -> Result<Iri, EngineError> {
    match session.resolve(name)? {
        Resource::Named(iri) => Ok(iri),
        Resource::Blank(_) => Err(EngineError::InvalidName(name.to_string())),
    }
}

impl StatementJson {
    /// Resolve every name through the session.
    pub fn to_statement(&self, session: &Session) -> Result<Statement, EngineError> {
        let subject = session.resolve(&self.subject)?;
        let predicate = resolve_iri(session, &self.predicate)?;
        let object: Term = match (&self.language, &self.datatype) {
            (Some(lang), _) => Literal::lang_string(self.object.clone(), lang.clone()).into(),
            (None, Some(datatype)) => {
                Literal::typed(self.object.clone(), resolve_iri(session, datatype)?).into()
            }
            (None, None) if self.literal => Literal::string(self.object.clone()).into(),
            (None, None) => session.resolve(&self.object)?.into(),
        };
        Ok(Statement::new(subject, predicate, object))
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

fn print_json(out: &mut dyn Write, value: &serde_json::Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Io(e.to_string()))?;
    writeln!(out, "{}", text)?;
    Ok(())
}

fn type_strings(types: &TypeSet) -> Vec<String> {
    types.iter().map(|t| t.iri().to_string()).collect()
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show repository status.
pub fn cmd_status(context: &Context, json_mode: bool, out: &mut dyn Write) -> Result<(), CliError> {
    let statements = context.repository().len()?;
    let namespaces = context.repository().connect()?.namespaces()?.len();
    let layers: Vec<String> = context
        .factory
        .config()
        .cache
        .layers
        .iter()
        .map(|l| format!("{:?}", l).to_lowercase())
        .collect();
    let roles = context.factory.registry().role_names();

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({
                "statements": statements,
                "namespaces": namespaces,
                "cache_layers": layers,
                "roles": roles,
            }),
        );
    }

    writeln!(out, "tripod Repository Status")?;
    writeln!(out, "========================")?;
    writeln!(out, "Statements:   {}", statements)?;
    writeln!(out, "Namespaces:   {}", namespaces)?;
    writeln!(out, "Cache layers: {}", layers.join(", "))?;
    writeln!(out, "Roles:        {}", roles.len())?;
    Ok(())
}

// =============================================================================
// IMPORT / EXPORT
// =============================================================================

/// Import statements from a JSON lines file in one transaction.
pub fn cmd_import(
    context: &Context,
    json_mode: bool,
    input: &Path,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let path = validate_file_path(input)?;
    validate_file_size(&path, MAX_IMPORT_FILE_SIZE)?;

    let mut session = context.session()?;
    let file = std::fs::File::open(&path)?;
    let mut statements = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reason = |e: String| CliError::Input {
            line: index + 1,
            reason: e,
        };
        let parsed: StatementJson =
            serde_json::from_str(&line).map_err(|e| reason(e.to_string()))?;
        statements.push(parsed.to_statement(&session).map_err(|e| reason(e.to_string()))?);
    }
    session.close()?;

    let mut connection = context.repository().connect()?;
    let before = context.repository().len()?;
    in_transaction(connection.as_mut(), |c| {
        for st in &statements {
            c.add(st)?;
        }
        Ok(())
    })?;
    let added = context.repository().len()?.saturating_sub(before);
    tracing::info!(read = statements.len(), added, "import finished");

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({ "read": statements.len(), "added": added }),
        );
    }
    writeln!(
        out,
        "Imported {} statements ({} new) from {}",
        statements.len(),
        added,
        input.display()
    )?;
    Ok(())
}

/// Export every statement as JSON lines.
pub fn cmd_export(
    context: &Context,
    json_mode: bool,
    output: &Path,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let path = validate_output_path(output)?;
    let statements = context.repository().statements()?;

    let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
    for st in &statements {
        let line = serde_json::to_string(&StatementJson::from(st))
            .map_err(|e| CliError::Io(e.to_string()))?;
        writeln!(file, "{}", line)?;
    }
    file.flush()?;

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({ "exported": statements.len(), "path": path.display().to_string() }),
        );
    }
    writeln!(
        out,
        "Exported {} statements to {}",
        statements.len(),
        path.display()
    )?;
    Ok(())
}

// =============================================================================
// NAMESPACES
// =============================================================================

/// List prefixes, show one, or register one.
pub fn cmd_namespace(
    context: &Context,
    json_mode: bool,
    prefix: Option<&str>,
    iri: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if let (Some(prefix), Some(iri)) = (prefix, iri) {
        if prefix.is_empty() || prefix.contains(':') {
            return Err(EngineError::InvalidName(prefix.to_string()).into());
        }
        context.repository().set_namespace(prefix, &Iri::new(iri))?;
        tracing::info!(prefix, iri, "namespace registered");
    }

    let namespaces = context.repository().connect()?.namespaces()?;
    let shown: BTreeMap<String, String> = namespaces
        .into_iter()
        .filter(|(p, _)| prefix.is_none_or(|wanted| wanted == p))
        .map(|(p, ns)| (p, ns.to_string()))
        .collect();
    if let Some(wanted) = prefix {
        if shown.is_empty() {
            return Err(EngineError::InvalidName(format!("unknown prefix {}", wanted)).into());
        }
    }

    if json_mode {
        return print_json(out, &serde_json::json!(shown));
    }
    for (p, ns) in &shown {
        writeln!(out, "{}: <{}>", p, ns)?;
    }
    Ok(())
}

// =============================================================================
// INSPECTION
// =============================================================================

/// Show the asserted types of a resource.
pub fn cmd_types(
    context: &Context,
    json_mode: bool,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut session = context.session()?;
    let resource = session.resolve(name)?;
    let types = type_strings(&session.types(&resource)?);
    session.close()?;

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({ "resource": resource.to_string(), "types": types }),
        );
    }
    for t in &types {
        writeln!(out, "<{}>", t)?;
    }
    Ok(())
}

/// Show an entity: types, roles and outgoing properties.
pub fn cmd_describe(
    context: &Context,
    json_mode: bool,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut session = context.session()?;
    let entity = session.find(name)?;
    let resource = entity.resource();

    let mut properties: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let outgoing = context
        .repository()
        .connect()?
        .find_statements(&StatementPattern::subject(resource.clone()))?;
    for st in outgoing {
        properties
            .entry(st.predicate.to_string())
            .or_default()
            .push(st.object.to_string());
    }
    let types = type_strings(entity.types());
    let roles: Vec<String> = entity.composite().roles().iter().cloned().collect();
    session.close()?;

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({
                "resource": resource.to_string(),
                "types": types,
                "roles": roles,
                "properties": properties,
            }),
        );
    }

    writeln!(out, "{}", resource)?;
    writeln!(out, "  types: {}", types.join(", "))?;
    writeln!(out, "  roles: {}", roles.join(", "))?;
    for (predicate, values) in &properties {
        for value in values {
            writeln!(out, "  <{}> {}", predicate, value)?;
        }
    }
    Ok(())
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Add (or retract) roles on an entity. Arguments that name no registered
/// role are resolved as type names.
pub fn cmd_designate(
    context: &Context,
    json_mode: bool,
    name: &str,
    roles: &[String],
    retract: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let registry = Arc::clone(context.factory.registry());
    let known = registry.role_names();
    let mut session = context.session()?;
    let entity = session.find(name)?;

    let (role_args, type_args): (Vec<&String>, Vec<&String>) =
        roles.iter().partition(|r| known.contains(*r));
    let role_names: Vec<&str> = role_args.iter().map(|r| r.as_str()).collect();

    let updated = if retract {
        if let Some(unknown) = type_args.first() {
            return Err(EngineError::InvalidName(format!("unknown role {}", unknown)).into());
        }
        session.remove_designation(&entity, &role_names)?
    } else {
        let mut extra = registry.types_for_roles(role_names.iter().copied());
        for arg in &type_args {
            extra.insert(RdfType(resolve_iri(&session, arg)?));
        }
        session.designate_types(&entity, &extra)?
    };

    let types = type_strings(updated.types());
    let roles: Vec<String> = updated.composite().roles().iter().cloned().collect();
    session.close()?;

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({
                "resource": updated.resource().to_string(),
                "types": types,
                "roles": roles,
            }),
        );
    }
    writeln!(out, "{}", updated.resource())?;
    writeln!(out, "  types: {}", types.join(", "))?;
    writeln!(out, "  roles: {}", roles.join(", "))?;
    Ok(())
}

/// Rename a resource in every statement.
pub fn cmd_rename(
    context: &Context,
    json_mode: bool,
    from: &str,
    to: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut session = context.session()?;
    let entity = session.find(from)?;
    let before = entity.resource();
    let renamed = session.rename(&entity, to)?;
    session.close()?;

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({
                "from": before.to_string(),
                "to": renamed.resource().to_string(),
            }),
        );
    }
    writeln!(out, "Renamed {} to {}", before, renamed.resource())?;
    Ok(())
}

/// Delete every statement mentioning a resource.
pub fn cmd_remove(
    context: &Context,
    json_mode: bool,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut session = context.session()?;
    let entity = session.find(name)?;
    let removed = session.remove(&entity)?;
    session.close()?;

    if json_mode {
        return print_json(
            out,
            &serde_json::json!({
                "resource": entity.resource().to_string(),
                "removed": removed,
            }),
        );
    }
    writeln!(out, "Removed {} statements mentioning {}", removed, entity.resource())?;
    Ok(())
}
