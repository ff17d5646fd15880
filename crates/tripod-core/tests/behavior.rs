//! # Behavioural Tests
//!
//! End-to-end checks of the engine's guarantees, grouped by concern:
//! - identity under each cache policy
//! - type closure
//! - rename and remove
//! - merge and transaction nesting
//! - query cardinality
//! - change-tracked invalidation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tripod_core::query::PreparedQuery;
use tripod_core::{
    CachePolicy, ChangeBus, DetachedValue, EngineConfig, EngineError, Entity, Iri, Literal,
    MemoryRepository, NativeValue, Projected, QueryLanguage, RdfType, RedbRepository, Repository,
    Resource, ResultType, RoleDef, SessionFactory, Statement, StatementPattern, StoreConnection,
    StoreError, Term, TypeRegistry,
};

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const EX: &str = "http://example.org/";

fn ex(local: &str) -> String {
    format!("{}{}", EX, local)
}

fn registry() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::new()
            .with_role(RoleDef::new("Base").with_type(ex("Base")))
            .with_role(RoleDef::new("A").with_type(ex("A")).extends("Base"))
            .with_role(RoleDef::new("B").with_type(ex("B")))
            .with_role(
                RoleDef::new("Person")
                    .with_type(ex("Person"))
                    .bulk_property(ex("name"))
                    .merge_from(),
            ),
    )
}

fn typed(subject: &str, rdf_type: &str) -> Statement {
    Statement::new(
        Resource::named(subject),
        Iri::new(RDF_TYPE),
        RdfType::new(rdf_type).as_resource(),
    )
}

fn alice_repo() -> MemoryRepository {
    let repo = MemoryRepository::with_statements(vec![typed(&ex("Alice"), &ex("Person"))]);
    repo.set_namespace("ex", Iri::new(EX));
    repo
}

fn factory(repo: &MemoryRepository, layers: Vec<CachePolicy>) -> SessionFactory {
    SessionFactory::new(Arc::new(repo.clone()), registry())
        .with_config(EngineConfig::with_layers(layers))
}

// =============================================================================
// IDENTITY
// =============================================================================

mod identity {
    use super::*;

    #[test]
    fn eager_cache_returns_same_instance() {
        let repo = alice_repo();
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");

        let first = session.find("ex:Alice").expect("find");
        for _ in 0..5 {
            let again = session.find("ex:Alice").expect("find");
            assert!(Entity::ptr_eq(&first, &again));
        }
    }

    #[test]
    fn no_cache_returns_equal_but_distinct_instances() {
        let repo = alice_repo();
        let mut session = factory(&repo, vec![CachePolicy::None])
            .open()
            .expect("open");

        let first = session.find("ex:Alice").expect("find");
        let second = session.find("ex:Alice").expect("find");
        assert!(!Entity::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_layer_list_behaves_like_no_cache() {
        let repo = alice_repo();
        let mut session = factory(&repo, Vec::new()).open().expect("open");
        let first = session.find("ex:Alice").expect("find");
        let second = session.find("ex:Alice").expect("find");
        assert!(!Entity::ptr_eq(&first, &second));
    }

    #[test]
    fn alice_end_to_end_under_both_policies() {
        let repo = alice_repo();

        let mut eager = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let a1 = eager.find("ex:Alice").expect("find");
        assert!(a1.implements("Person"));
        let a2 = eager.find("ex:Alice").expect("find");
        assert!(Entity::ptr_eq(&a1, &a2));

        let mut uncached = factory(&repo, vec![CachePolicy::None])
            .open()
            .expect("open");
        let b1 = uncached.find("ex:Alice").expect("find");
        assert!(b1.implements("Person"));
        let b2 = uncached.find("ex:Alice").expect("find");
        assert_eq!(b1, b2);
        assert!(!Entity::ptr_eq(&b1, &b2));
    }

    #[test]
    fn eager_hit_ignores_requested_types() {
        let repo = alice_repo();
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let alice = session.find("ex:Alice").expect("find");

        let types = [RdfType::new(ex("B"))].into_iter().collect();
        let again = session
            .find_typed(&alice.resource(), &types)
            .expect("find typed");
        assert!(Entity::ptr_eq(&alice, &again));
        assert!(!again.implements("B"));
    }
}

// =============================================================================
// TYPE CLOSURE
// =============================================================================

mod type_closure {
    use super::*;

    #[test]
    fn stored_types_resolve_with_super_roles() {
        let repo = MemoryRepository::with_statements(vec![
            typed(&ex("r"), &ex("A")),
            typed(&ex("r"), &ex("B")),
        ]);
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");

        let entity = session
            .find_resource(&Resource::named(ex("r")))
            .expect("find");
        assert!(entity.implements("Base"));
        assert!(entity.implements("A"));
        assert!(entity.implements("B"));
    }

    #[test]
    fn foreign_types_stay_readable() {
        let repo = MemoryRepository::with_statements(vec![typed(&ex("r"), "http://other/Thing")]);
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");

        let entity = session
            .find_resource(&Resource::named(ex("r")))
            .expect("find");
        assert!(entity.composite().is_default());
        assert!(entity.types().contains(&RdfType::new("http://other/Thing")));
    }
}

// =============================================================================
// RENAME AND REMOVE
// =============================================================================

mod rename_remove {
    use super::*;

    fn graph() -> MemoryRepository {
        let p = Iri::new(ex("p"));
        let repo = MemoryRepository::with_statements(vec![
            Statement::new(Resource::named(ex("r1")), p.clone(), Resource::named(ex("o"))),
            Statement::new(Resource::named(ex("s")), p, Resource::named(ex("r1"))),
        ]);
        repo.set_namespace("ex", Iri::new(EX));
        repo
    }

    #[test]
    fn rename_migrates_both_positions() {
        let repo = graph();
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let r1 = session.find("ex:r1").expect("find");

        let r2 = session.rename(&r1, "ex:r2").expect("rename");
        assert_eq!(r2.resource(), Resource::named(ex("r2")));
        assert!(Entity::ptr_eq(&r1, &r2), "eager cache re-points the entity");

        let p = Iri::new(ex("p"));
        let expected = vec![
            Statement::new(Resource::named(ex("r2")), p.clone(), Resource::named(ex("o"))),
            Statement::new(Resource::named(ex("s")), p, Resource::named(ex("r2"))),
        ];
        let mut actual = repo.statements();
        actual.sort();
        let mut expected_sorted = expected;
        expected_sorted.sort();
        assert_eq!(actual, expected_sorted);
        assert!(
            repo.statements()
                .iter()
                .all(|st| !st.mentions(&Resource::named(ex("r1"))))
        );
    }

    #[test]
    fn rename_refreshes_incoming_property_cache() {
        let repo = graph();
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let s = session.find("ex:s").expect("find");
        let p = Iri::new(ex("p"));
        assert_eq!(
            session.property_values(&s, &p).expect("values"),
            vec![Term::from(Resource::named(ex("r1")))]
        );

        let r1 = session.find("ex:r1").expect("find");
        session.rename(&r1, "ex:r2").expect("rename");
        assert_eq!(
            session.property_values(&s, &p).expect("values"),
            vec![Term::from(Resource::named(ex("r2")))]
        );
    }

    #[test]
    fn remove_leaves_no_mentions() {
        let repo = graph();
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let r1 = session.find("ex:r1").expect("find");

        let removed = session.remove(&r1).expect("remove");
        assert_eq!(removed, 2);
        let conn = repo.connect().expect("connect");
        let r1 = Resource::named(ex("r1"));
        assert!(
            conn.find_statements(&StatementPattern::subject(r1.clone()))
                .expect("find")
                .is_empty()
        );
        assert!(
            conn.find_statements(&StatementPattern::object(r1))
                .expect("find")
                .is_empty()
        );
    }
}

// =============================================================================
// MERGE AND TRANSACTION NESTING
// =============================================================================

mod merge_nesting {
    use super::*;

    /// Repository whose connections count commit and rollback calls.
    struct CountingRepository {
        inner: MemoryRepository,
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    struct CountingConnection {
        inner: Box<dyn StoreConnection>,
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    impl Repository for CountingRepository {
        fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
            Ok(Box::new(CountingConnection {
                inner: self.inner.connect()?,
                commits: Arc::clone(&self.commits),
                rollbacks: Arc::clone(&self.rollbacks),
            }))
        }

        fn changes(&self) -> &ChangeBus {
            self.inner.changes()
        }
    }

    impl StoreConnection for CountingConnection {
        fn add(&mut self, statement: &Statement) -> Result<(), StoreError> {
            self.inner.add(statement)
        }

        fn remove(&mut self, statement: &Statement) -> Result<(), StoreError> {
            self.inner.remove(statement)
        }

        fn find_statements(
            &self,
            pattern: &StatementPattern,
        ) -> Result<Vec<Statement>, StoreError> {
            self.inner.find_statements(pattern)
        }

        fn begin(&mut self) -> Result<(), StoreError> {
            self.inner.begin()
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.inner.commit()
        }

        fn rollback(&mut self) -> Result<(), StoreError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            self.inner.rollback()
        }

        fn is_active(&self) -> bool {
            self.inner.is_active()
        }

        fn prepare_query(
            &self,
            language: QueryLanguage,
            text: &str,
        ) -> Result<Box<dyn PreparedQuery>, StoreError> {
            self.inner.prepare_query(language, text)
        }

        fn namespaces(&self) -> Result<BTreeMap<String, Iri>, StoreError> {
            self.inner.namespaces()
        }
    }

    fn person(key: &str) -> DetachedValue {
        DetachedValue::new(key)
            .with_role("Person")
            .with_property(ex("name"), Literal::string(key))
    }

    #[test]
    fn merge_is_idempotent_per_session() {
        let repo = MemoryRepository::new();
        let mut session = factory(&repo, vec![CachePolicy::None])
            .open()
            .expect("open");
        let value = person("x");

        let first = session.merge(&value).expect("merge");
        let second = session.merge(&value).expect("merge");
        assert_eq!(first.resource(), second.resource());
    }

    #[test]
    fn merge_never_ends_a_caller_transaction() {
        let commits = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let repo = CountingRepository {
            inner: MemoryRepository::new(),
            commits: Arc::clone(&commits),
            rollbacks: Arc::clone(&rollbacks),
        };
        let mut session = SessionFactory::new(Arc::new(repo), registry())
            .open()
            .expect("open");

        session.begin().expect("begin");
        session.merge(&person("x")).expect("merge");
        let y = person("y");
        let z = person("z");
        let values: [&dyn tripod_core::Detached; 2] = [&y, &z];
        session.merge_all(&values).expect("merge all");
        assert!(session.is_active());
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);

        session.commit().expect("commit");
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn merge_owns_its_transaction_when_none_is_open() {
        let commits = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let repo = CountingRepository {
            inner: MemoryRepository::new(),
            commits: Arc::clone(&commits),
            rollbacks: Arc::clone(&rollbacks),
        };
        let mut session = SessionFactory::new(Arc::new(repo), registry())
            .open()
            .expect("open");

        session.merge(&person("x")).expect("merge");
        assert!(!session.is_active());
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_merge_rolls_back_only_its_own_transaction() {
        let registry = Arc::new(
            TypeRegistry::new().with_role(
                RoleDef::new("Fragile")
                    .with_type(ex("Fragile"))
                    .with_initializer(|_| Err("cannot build".to_string())),
            ),
        );
        let repo = MemoryRepository::new();
        let mut session = SessionFactory::new(Arc::new(repo.clone()), registry)
            .open()
            .expect("open");
        let fragile = DetachedValue::new("f").with_role("Fragile");

        let result = session.merge(&fragile);
        assert!(matches!(
            result,
            Err(EngineError::EntityConstruction { .. })
        ));
        assert!(!session.is_active());
        assert!(repo.is_empty());

        session.begin().expect("begin");
        assert!(session.merge(&fragile).is_err());
        assert!(session.is_active(), "caller transaction must stay open");
        session.rollback().expect("rollback");
    }

    #[test]
    fn failed_merge_all_leaves_no_cached_roles() {
        let registry = Arc::new(
            TypeRegistry::new()
                .with_role(RoleDef::new("Good").with_type(ex("Good")))
                .with_role(
                    RoleDef::new("Broken")
                        .with_type(ex("Broken"))
                        .with_initializer(|_| Err("cannot build".to_string())),
                ),
        );
        let repo = MemoryRepository::new();
        let mut session = SessionFactory::new(Arc::new(repo.clone()), registry)
            .with_config(EngineConfig::with_layers(vec![CachePolicy::Eager]))
            .open()
            .expect("open");
        let good = DetachedValue::new("a").named(ex("a")).with_role("Good");
        let broken = DetachedValue::new("b").with_role("Broken");
        let values: [&dyn tripod_core::Detached; 2] = [&good, &broken];

        assert!(session.merge_all(&values).is_err());
        assert!(!session.is_active());
        assert_eq!(repo.len(), 0);

        let a = Resource::named(ex("a"));
        let found = session.find_resource(&a).expect("find");
        assert!(!found.implements("Good"));
        assert!(session.types(&a).expect("types").is_empty());
    }

    #[test]
    fn merged_state_is_visible_through_queries() {
        let repo = MemoryRepository::new();
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let merged = session.merge(&person("q")).expect("merge");

        let name = session
            .create_query(QueryLanguage::Pattern, &format!("select ?s <{}> ?n", ex("name")))
            .expect("prepare")
            .bind("s", merged.resource())
            .single_result(ResultType::Auto)
            .expect("single");
        assert_eq!(
            name.as_value(),
            Some(&NativeValue::String("q".to_string()))
        );
    }
}

// =============================================================================
// QUERY CARDINALITY
// =============================================================================

mod query_cardinality {
    use super::*;

    fn people(n: usize) -> MemoryRepository {
        let repo = MemoryRepository::with_statements(
            (0..n).map(|i| typed(&ex(&format!("p{}", i)), &ex("Person"))),
        );
        repo.set_namespace("ex", Iri::new(EX));
        repo
    }

    fn single(repo: &MemoryRepository) -> Result<Projected, EngineError> {
        let mut session = factory(repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let result = session
            .create_query(
                QueryLanguage::Pattern,
                &format!("select ?s a <{}>", ex("Person")),
            )
            .expect("prepare")
            .single_result(ResultType::Auto);
        result
    }

    #[test]
    fn zero_rows_is_no_result() {
        assert!(matches!(single(&people(0)), Err(EngineError::NoResult)));
    }

    #[test]
    fn two_rows_is_non_unique() {
        assert!(matches!(
            single(&people(2)),
            Err(EngineError::NonUniqueResult)
        ));
    }

    #[test]
    fn one_row_projects_an_entity() {
        let result = single(&people(1)).expect("one row");
        let entity = result.as_entity().expect("entity");
        assert!(entity.implements("Person"));
    }

    #[test]
    fn graph_results_project_distinct_subjects() {
        let repo = people(3);
        let extra = Statement::new(
            Resource::named(ex("p0")),
            Iri::new(ex("name")),
            Literal::string("zero"),
        );
        repo.connect()
            .expect("connect")
            .add(&extra)
            .expect("add");

        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let entities: Vec<Entity> = session
            .create_query(QueryLanguage::Pattern, "construct ?s ?p ?o")
            .expect("prepare")
            .evaluate(ResultType::Entity(Default::default()))
            .expect("evaluate")
            .map(|r| match r.expect("row") {
                Projected::Entity(e) => Some(e),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .expect("entities only");
        assert_eq!(entities.len(), 3);
    }

    #[test]
    fn entity_limit_counts_subjects_not_statements() {
        let repo = people(2);
        repo.connect()
            .expect("connect")
            .add(&Statement::new(
                Resource::named(ex("p0")),
                Iri::new(ex("name")),
                Literal::string("zero"),
            ))
            .expect("add");

        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let subjects: Vec<Resource> = session
            .create_query(QueryLanguage::Pattern, "construct ?s ?p ?o")
            .expect("prepare")
            .max_results(2)
            .evaluate(ResultType::Entity(Default::default()))
            .expect("evaluate")
            .map(|r| match r.expect("row") {
                Projected::Entity(e) => Some(e.resource()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .expect("entities only");
        assert_eq!(
            subjects,
            vec![Resource::named(ex("p0")), Resource::named(ex("p1"))]
        );
    }

    #[test]
    fn paging_skips_and_limits() {
        let repo = people(5);
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let page: Vec<_> = session
            .create_query(
                QueryLanguage::Pattern,
                &format!("select ?s a <{}>", ex("Person")),
            )
            .expect("prepare")
            .first_result(3)
            .max_results(10)
            .evaluate(ResultType::Auto)
            .expect("evaluate")
            .collect::<Result<_, _>>()
            .expect("rows");
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn ask_yields_a_boolean() {
        let repo = people(1);
        let mut session = factory(&repo, vec![CachePolicy::Eager])
            .open()
            .expect("open");
        let answer = session
            .create_query(QueryLanguage::Pattern, "ask ?s a ?t")
            .expect("prepare")
            .single_result(ResultType::Auto)
            .expect("answer");
        assert!(matches!(answer, Projected::Boolean(true)));
    }
}

// =============================================================================
// CHANGE-TRACKED INVALIDATION
// =============================================================================

mod tracked_invalidation {
    use super::*;

    #[test]
    fn change_evicts_subject_and_object() {
        let repo = MemoryRepository::new();
        let factory = factory(&repo, vec![CachePolicy::Tracked]);
        let mut reader = factory.open().expect("open");
        let mut writer = factory.open().expect("open");

        let s = Resource::named(ex("S"));
        let o = Resource::named(ex("O"));
        let s1 = reader.find_resource(&s).expect("find");
        let o1 = reader.find_resource(&o).expect("find");
        assert!(Entity::ptr_eq(&s1, &reader.find_resource(&s).expect("find")));

        let target = writer.find_resource(&s).expect("find");
        writer
            .add_property(&target, &Iri::new(ex("knows")), o.clone())
            .expect("write");

        let s2 = reader.find_resource(&s).expect("find");
        let o2 = reader.find_resource(&o).expect("find");
        assert!(!Entity::ptr_eq(&s1, &s2));
        assert!(!Entity::ptr_eq(&o1, &o2));
        assert_eq!(s1, s2);
    }

    #[test]
    fn unrelated_entries_survive() {
        let repo = MemoryRepository::new();
        let factory = factory(&repo, vec![CachePolicy::Tracked]);
        let mut reader = factory.open().expect("open");
        let mut writer = factory.open().expect("open");

        let other = reader
            .find_resource(&Resource::named(ex("other")))
            .expect("find");
        let target = writer
            .find_resource(&Resource::named(ex("S")))
            .expect("find");
        writer
            .add_property(&target, &Iri::new(ex("label")), Literal::string("x"))
            .expect("write");

        let again = reader
            .find_resource(&Resource::named(ex("other")))
            .expect("find");
        assert!(Entity::ptr_eq(&other, &again));
    }

    #[test]
    fn designate_is_seen_by_tracked_sessions() {
        let repo = alice_repo();
        let factory = factory(&repo, vec![CachePolicy::Tracked]);
        let mut reader = factory.open().expect("open");
        let mut writer = factory.open().expect("open");

        let before = reader.find("ex:Alice").expect("find");
        assert!(!before.implements("B"));

        let alice = writer.find("ex:Alice").expect("find");
        writer.designate(&alice, &["B"]).expect("designate");

        let after = reader.find("ex:Alice").expect("find");
        assert!(after.implements("B"));
    }

    #[test]
    fn eager_layer_in_front_still_sees_changes() {
        let repo = MemoryRepository::new();
        let factory = factory(&repo, vec![CachePolicy::Eager, CachePolicy::Tracked]);
        let mut session = factory.open().expect("open");

        let s = Resource::named(ex("S"));
        let before = session.find_resource(&s).expect("find");
        assert!(Entity::ptr_eq(&before, &session.find_resource(&s).expect("find")));

        repo.connect()
            .expect("connect")
            .add(&Statement::new(
                s.clone(),
                Iri::new(ex("knows")),
                Resource::named(ex("O")),
            ))
            .expect("external write");

        let after = session.find_resource(&s).expect("find");
        assert!(!Entity::ptr_eq(&before, &after));
    }

    #[test]
    fn close_releases_subscriptions() {
        let repo = MemoryRepository::new();
        let factory = factory(&repo, vec![CachePolicy::Eager, CachePolicy::Tracked]);
        let mut session = factory.open().expect("open");
        assert_eq!(repo.changes().listener_count(), 1);
        session.close().expect("close");
        assert_eq!(repo.changes().listener_count(), 0);
    }
}

// =============================================================================
// PERSISTENT STORE
// =============================================================================

mod persistent {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entities_survive_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("tripod.redb");

        {
            let repo = RedbRepository::open(&path).expect("open db");
            repo.set_namespace("ex", &Iri::new(EX)).expect("namespace");
            let mut session = SessionFactory::new(Arc::new(repo), registry())
                .open()
                .expect("open");
            let alice = session
                .create_named("ex:Alice", &["Person"])
                .expect("create");
            session
                .set_literal(&alice, &Iri::new(ex("name")), &NativeValue::from("Alice"))
                .expect("name");
            session.close().expect("close");
        }

        let repo = RedbRepository::open(&path).expect("reopen db");
        let mut session = SessionFactory::new(Arc::new(repo), registry())
            .open()
            .expect("open");
        let alice = session.find("ex:Alice").expect("find");
        assert!(alice.implements("Person"));
        assert_eq!(
            session
                .literal_values(&alice, &Iri::new(ex("name")))
                .expect("name"),
            vec![NativeValue::String("Alice".to_string())]
        );
    }
}
