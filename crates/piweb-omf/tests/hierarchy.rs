use piweb_client::{Method, MockHistorian, SdkError};
use piweb_omf::{ElementDefinition, HierarchyResolver, ParentAnchor, VisibilityRetry};

const DATABASE: &str = "D0";

fn historian() -> MockHistorian {
    let mock = MockHistorian::new();
    mock.add_database(DATABASE, "\\\\afserver\\Default");
    mock
}

fn database() -> ParentAnchor {
    ParentAnchor::Database(DATABASE.to_string())
}

#[tokio::test(flavor = "current_thread")]
async fn ensure_existing_element_expected_no_creation() {
    let mock = historian();
    let existing = mock.insert_element(DATABASE, "IndyIQ_OMF");
    let resolver = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(3));

    let anchor = resolver
        .ensure(&database(), "IndyIQ_OMF", &ElementDefinition::default())
        .await
        .expect("ensure should succeed");

    assert_eq!(anchor.web_id, existing);
    assert!(
        mock.requests_to(Method::Post, "assetdatabases/D0/elements")
            .is_empty()
    );
}

#[tokio::test(flavor = "current_thread")]
async fn ensure_masks_visibility_lag_with_bounded_retries() {
    let mock = historian();
    mock.set_visibility_lag(2);
    let resolver = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(5));

    let anchor = resolver
        .ensure(
            &database(),
            "IndyIQ_OMF",
            &ElementDefinition::described("Root for OMF demo"),
        )
        .await
        .expect("ensure should succeed");

    assert_eq!(anchor.name, "IndyIQ_OMF");
    assert_eq!(anchor.path.as_deref(), Some("\\\\afserver\\Default\\IndyIQ_OMF"));
    assert_eq!(
        mock.requests_to(Method::Post, "assetdatabases/D0/elements").len(),
        1
    );
    // Initial lookup, then two hidden lookups, then the one that sees it.
    assert_eq!(
        mock.requests_to(Method::Get, "assetdatabases/D0/elements").len(),
        4
    );
}

#[tokio::test(flavor = "current_thread")]
async fn ensure_never_visible_expected_timeout() {
    let mock = historian();
    mock.set_visibility_lag(10);
    let resolver = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(3));

    let error = resolver
        .ensure(&database(), "Model", &ElementDefinition::default())
        .await
        .expect_err("element stays hidden");

    assert!(matches!(error, SdkError::Timeout(_)));
    assert_eq!(
        mock.requests_to(Method::Post, "assetdatabases/D0/elements").len(),
        1
    );
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_ensure_expected_same_anchor() {
    let mock = historian();
    mock.set_visibility_lag(1);
    let first = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(5));
    let second = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(5));
    let definition = ElementDefinition::default();
    let parent = database();

    let (left, right) = tokio::join!(
        first.ensure(&parent, "Model", &definition),
        second.ensure(&parent, "Model", &definition),
    );

    let left = left.expect("first caller");
    let right = right.expect("second caller");
    assert_eq!(left, right);
    assert_eq!(mock.children_named(DATABASE, "Model").len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn ensure_after_hidden_create_conflict_expected_existing_anchor() {
    let mock = historian();
    mock.set_visibility_lag(3);
    let parent = database();
    let definition = ElementDefinition::default();

    // The first caller creates the element but gives up before it shows up.
    let impatient = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(0));
    let error = impatient
        .ensure(&parent, "Model", &definition)
        .await
        .expect_err("element is still hidden");
    assert!(matches!(error, SdkError::Timeout(_)));

    // The second caller misses it too, so its create hits the existing name.
    let resolver = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(5));
    let anchor = resolver
        .ensure(&parent, "Model", &definition)
        .await
        .expect("conflicting create should still resolve");

    let created = mock.children_named(DATABASE, "Model");
    assert_eq!(created.len(), 1);
    assert_eq!(anchor.web_id, created[0]);
    assert_eq!(
        mock.requests_to(Method::Post, "assetdatabases/D0/elements").len(),
        2
    );
}

#[tokio::test(flavor = "current_thread")]
async fn duplicate_siblings_resolve_to_smallest_web_id() {
    let mock = historian();
    mock.allow_duplicate_siblings(true);
    let older = mock.insert_element(DATABASE, "Model");
    let newer = mock.insert_element(DATABASE, "Model");
    assert!(older < newer);
    let resolver = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(3));

    for _ in 0..2 {
        let anchor = resolver
            .ensure(&database(), "Model", &ElementDefinition::default())
            .await
            .expect("ensure should succeed");
        assert_eq!(anchor.web_id, older);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn ensure_path_builds_nested_elements() {
    let mock = historian();
    let resolver = HierarchyResolver::with_retry(mock.clone(), VisibilityRetry::immediate(3));

    let anchors = resolver
        .ensure_path(
            &database(),
            &[
                ("IndyIQ_OMF", ElementDefinition::described("Root for OMF demo")),
                ("Model", ElementDefinition::described("Model container")),
                ("Model1", ElementDefinition::described("Model instance 1")),
            ],
        )
        .await
        .expect("path should resolve");

    let paths: Vec<_> = anchors
        .iter()
        .map(|anchor| anchor.path.clone().unwrap_or_default())
        .collect();
    assert_eq!(
        paths,
        vec![
            "\\\\afserver\\Default\\IndyIQ_OMF",
            "\\\\afserver\\Default\\IndyIQ_OMF\\Model",
            "\\\\afserver\\Default\\IndyIQ_OMF\\Model\\Model1",
        ]
    );
    assert_eq!(mock.children_named(&anchors[0].web_id, "Model").len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn ensure_under_unknown_parent_expected_not_found() {
    let resolver = HierarchyResolver::with_retry(historian(), VisibilityRetry::immediate(3));
    let error = resolver
        .ensure(
            &ParentAnchor::Element("missing".to_string()),
            "Model",
            &ElementDefinition::default(),
        )
        .await
        .expect_err("unknown parent");
    assert_eq!(error, SdkError::not_found("parent", "missing"));
}
