//! End-to-end pipeline tests over local site fixtures: detection, inventory
//! filtering, content extraction, compatibility validation, and rendering.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use librovore_core::config::Config;
use librovore_core::error::Error;
use librovore_core::query::{ContentQueryOptions, InventoryQueryOptions};
use librovore_core::{Librovore, MatchMode, ProcessorGenus, Render};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Build a version-2 `objects.inv` from payload lines.
fn objects_inv(lines: &[&str]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"# Sphinx inventory version 2\n");
    bytes.extend_from_slice(b"# Project: fixture\n");
    bytes.extend_from_slice(b"# Version: 1.0\n");
    bytes.extend_from_slice(b"# The remainder of this file is compressed using zlib.\n");
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    bytes.extend_from_slice(&encoder.finish().unwrap());
    bytes
}

const SPHINX_INDEX: &str = r#"<!DOCTYPE html>
<html><head><meta name="generator" content="sphinx 7.2.6" /></head>
<body><div class="body" role="main"><p>Fixture docs. <a href="_static/pygments.css">css</a></p></div></body></html>"#;

const SPHINX_OS_PATH_PAGE: &str = r##"<!DOCTYPE html>
<html><head><meta name="generator" content="sphinx 7.2.6" /></head>
<body>
<div class="body" role="main">
<dl class="py function">
<dt class="sig sig-object py" id="os.path.join">
<span class="sig-name">os.path.join</span><span class="sig-paren">(</span><em class="sig-param">path</em>, <em class="sig-param">*paths</em><span class="sig-paren">)</span><a class="headerlink" href="#os.path.join">¶</a>
</dt>
<dd><p>Join one or more path segments intelligently.</p></dd>
</dl>
<dl class="py function">
<dt class="sig sig-object py" id="os.path.exists">
<span class="sig-name">os.path.exists</span><span class="sig-paren">(</span><em class="sig-param">path</em><span class="sig-paren">)</span><a class="headerlink" href="#os.path.exists">¶</a>
</dt>
<dd><p>Return True if path refers to an existing path.</p></dd>
</dl>
</div>
</body></html>"##;

/// Lay down a minimal Sphinx site under `root`.
fn write_sphinx_site(root: &Path) {
    std::fs::create_dir_all(root.join("library")).unwrap();
    std::fs::write(
        root.join("objects.inv"),
        objects_inv(&[
            "os.path.join py:function 1 library/os.path.html#$ -",
            "os.path.exists py:function 1 library/os.path.html#$ -",
            "os.PathLike py:class 1 library/os.path.html#$ -",
        ]),
    )
    .unwrap();
    std::fs::write(root.join("index.html"), SPHINX_INDEX).unwrap();
    std::fs::write(root.join("library/os.path.html"), SPHINX_OS_PATH_PAGE).unwrap();
}

async fn engine() -> Librovore {
    Librovore::new(Config::default()).await.unwrap()
}

#[tokio::test]
async fn sphinx_inventory_exact_filter() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let mut filters = BTreeMap::new();
    filters.insert("domain".to_string(), "py".to_string());
    filters.insert("role".to_string(), "function".to_string());

    let result = engine
        .query_inventory(
            &source,
            "os.path.join",
            InventoryQueryOptions {
                filters,
                match_mode: MatchMode::Exact,
                results_max: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.matches_total, 1);
    assert_eq!(result.objects.len(), 1);
    let object = &result.objects[0];
    assert_eq!(object.name, "os.path.join");
    assert_eq!(object.expanded_uri(), "library/os.path.html#os.path.join");
    assert_eq!(result.search_metadata.inventory_processor, "sphinx");
}

#[tokio::test]
async fn fuzzy_match_ranks_closer_name_first() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_inventory(
            &source,
            "join",
            InventoryQueryOptions {
                fuzzy_threshold: Some(60),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.matches_total >= 2, "both os.path.* names should match");
    assert_eq!(result.objects[0].name, "os.path.join");
    let names: Vec<&str> = result.objects.iter().map(|o| o.name.as_str()).collect();
    assert!(names.contains(&"os.path.exists"));
}

#[tokio::test]
async fn results_max_zero_is_empty_but_counted() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_inventory(
            &source,
            "",
            InventoryQueryOptions {
                results_max: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.objects.len(), 0);
    assert_eq!(result.matches_total, 3);
}

#[tokio::test]
async fn empty_term_and_filters_return_everything_paged() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_inventory(
            &source,
            "",
            InventoryQueryOptions {
                results_max: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.matches_total, 3);
    assert_eq!(result.objects.len(), 2);
}

#[tokio::test]
async fn summarize_computes_distributions_over_full_set() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_inventory(
            &source,
            "",
            InventoryQueryOptions {
                summarize: true,
                results_max: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let summary = result.summary.unwrap();
    // Counts reflect all three matches despite the one-object page.
    assert_eq!(summary["role"]["function"], 2);
    assert_eq!(summary["role"]["class"], 1);
    assert_eq!(summary["domain"]["py"], 3);
}

#[tokio::test]
async fn unsupported_filter_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let mut filters = BTreeMap::new();
    filters.insert("item_type".to_string(), "struct".to_string());
    let result = engine
        .query_inventory(
            &source,
            "join",
            InventoryQueryOptions {
                filters,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(Error::FilterUnsupported { filter, .. }) if filter == "item_type"
    ));
}

#[tokio::test]
async fn query_content_extracts_signature_and_description() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_content(&source, "join", ContentQueryOptions::default())
        .await
        .unwrap();

    assert!(!result.documents.is_empty());
    let document = &result.documents[0];
    assert_eq!(document.name, "os.path.join");
    assert_eq!(document.signature, "os.path.join(path, *paths)");
    assert!(document.description.contains("Join one or more path segments"));
    assert!(document.documentation_url.ends_with("library/os.path.html#os.path.join"));
    assert!(document.relevance_score > 0.5);
    let snippet = document.content_snippet.as_deref().unwrap();
    assert!(snippet.to_lowercase().contains("join"));
    assert_eq!(
        result.search_metadata.structure_processor.as_deref(),
        Some("sphinx")
    );
}

#[tokio::test]
async fn incompatible_inventory_and_structure_processors() {
    let dir = tempfile::tempdir().unwrap();
    // A rustdoc inventory on a page that looks Sphinx-rendered: the only
    // registered structure processor (sphinx) detects, but cannot serve the
    // rustdoc inventory type.
    std::fs::write(
        dir.path().join("all.html"),
        r#"<!DOCTYPE html>
<html><head><meta name="generator" content="rustdoc"></head>
<body class="rustdoc mod">
<h3 id="functions">Functions</h3>
<ul class="all-items"><li><a href="fn.escape.html">escape</a></li></ul>
</body></html>"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("index.html"), SPHINX_INDEX).unwrap();

    let mut config = Config::default();
    config
        .inventory_extensions
        .retain(|e| e.name == "rustdoc");
    config.structure_extensions.retain(|e| e.name == "sphinx");
    let engine = Librovore::new(config).await.unwrap();
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_content(&source, "escape", ContentQueryOptions::default())
        .await;
    match result {
        Err(Error::ProcessorIncompatible {
            inventory_type,
            structure_processor,
        }) => {
            assert_eq!(inventory_type, "rustdoc");
            assert_eq!(structure_processor, "sphinx");
        },
        other => panic!("expected ProcessorIncompatible, got {other:?}"),
    }

    // The inventory side alone still works.
    let inventory = engine
        .query_inventory(&source, "escape", InventoryQueryOptions::default())
        .await
        .unwrap();
    assert_eq!(inventory.matches_total, 1);
    assert_eq!(inventory.objects[0].name, "escape");
}

#[tokio::test]
async fn robots_denial_blocks_queries_and_caches_rules() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine().await;
    let source = server.uri();

    for _ in 0..2 {
        let result = engine
            .query_inventory(&source, "anything", InventoryQueryOptions::default())
            .await;
        assert!(matches!(result, Err(Error::AccessDisallowed { .. })));
    }
    // The parsed rules were cached: one robots fetch total.
    server.verify().await;
}

#[tokio::test]
async fn detection_is_cached_within_ttl() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let first = engine.detect(&source, None).await.unwrap();
    let second = engine.detect(&source, None).await.unwrap();
    assert_eq!(first.detections.len(), second.detections.len());
    for (a, b) in first.detections.iter().zip(&second.detections) {
        assert_eq!(a.processor, b.processor);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }

    let sphinx = first
        .detections
        .iter()
        .find(|d| d.processor == "sphinx" && d.genus == ProcessorGenus::Inventory)
        .unwrap();
    assert!(!sphinx.rejected);
    assert_eq!(sphinx.inventory_type.as_deref(), Some("sphinx_objects_inv"));
}

#[tokio::test]
async fn survey_lists_builtin_processors() {
    let engine = engine().await;
    let survey = engine.survey_processors();
    let inventory_names: Vec<&str> = survey.inventory.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(inventory_names, vec!["sphinx", "mkdocs", "rustdoc", "pydoctor"]);
    let sphinx = &survey.inventory[0];
    assert!(sphinx.supported_filters.contains(&"domain".to_string()));
    let sphinx_structure = &survey.structure[0];
    assert!(
        sphinx_structure
            .supported_inventory_types
            .contains(&"sphinx_objects_inv".to_string())
    );

    // Survey output renders and round-trips.
    let json = survey.render_as_json(false);
    assert!(json["inventory"].as_array().unwrap().len() == 4);
}

#[tokio::test]
async fn rendered_results_roundtrip_through_json() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_inventory(&source, "join", InventoryQueryOptions::default())
        .await
        .unwrap();
    let parsed: librovore_core::InventoryQueryResult =
        serde_json::from_value(result.render_as_json(false)).unwrap();
    assert_eq!(parsed.matches_total, result.matches_total);
    assert_eq!(parsed.objects, result.objects);

    let markdown = result.render_as_markdown(false);
    assert!(markdown.iter().any(|line| line.contains("os.path.join")));
}

#[tokio::test]
async fn fuzzy_threshold_100_behaves_like_exact_containment() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let fuzzy = engine
        .query_inventory(
            &source,
            "join",
            InventoryQueryOptions {
                fuzzy_threshold: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let exact = engine
        .query_inventory(
            &source,
            "join",
            InventoryQueryOptions {
                match_mode: MatchMode::Exact,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let fuzzy_names: Vec<&str> = fuzzy.objects.iter().map(|o| o.name.as_str()).collect();
    let exact_names: Vec<&str> = exact.objects.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(fuzzy_names, exact_names);
    assert_eq!(fuzzy.matches_total, exact.matches_total);
}

#[tokio::test]
async fn regex_match_mode() {
    let dir = tempfile::tempdir().unwrap();
    write_sphinx_site(dir.path());
    let engine = engine().await;
    let source = dir.path().to_string_lossy().to_string();

    let result = engine
        .query_inventory(
            &source,
            r"^os\.path\.\w+$",
            InventoryQueryOptions {
                match_mode: MatchMode::Regex,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.matches_total, 2);

    let invalid = engine
        .query_inventory(
            &source,
            "[unclosed",
            InventoryQueryOptions {
                match_mode: MatchMode::Regex,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(invalid, Err(Error::MatchModeInvalid(_))));
}
