//! End-to-end scenario tests covering navigation, assertion gating,
//! chunked DOM storage, and screenshot diffing, driven against
//! `ScriptedDriver` so the suite runs without a live Chrome process.

#[cfg(test)]
mod end_to_end {
    use crate::driver::ScriptedDriver;
    use crate::orchestrator::Orchestrator;
    use crate::storage::dom_store::query_html_by_selector;
    use crate::storage::screenshot_store::ScreenshotStore;
    use crate::test_builder::TestBuilder;
    use crate::types::{
        CaptureFlags, ConsoleAssertions, ConsoleLevel, ConsoleLogEntry, DomAssertion, RunStatus,
        Validations,
    };
    use crate::{config::EngineConfig, utils::generate_id};
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn tmp_config(label: &str) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.storage_base_dir =
            std::env::temp_dir().join(format!("smoke-oracle-e2e-{label}-{}", generate_id("dir")));
        config
    }

    fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn console_entry(level: ConsoleLevel, message: &str) -> ConsoleLogEntry {
        ConsoleLogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            args: vec![],
            stack: None,
            source: None,
        }
    }

    /// Scenario 1: smoke navigation produces a passed run with one
    /// checkpoint and three artifact refs, and the html/console refs
    /// retrieve their raw captures.
    #[tokio::test]
    async fn smoke_navigation_yields_passed_run_with_three_artifacts() {
        let config = tmp_config("smoke");
        let driver = ScriptedDriver::new(
            "<html><head><title>Example</title></head><body><h1>hi</h1></body></html>",
            vec![],
            solid_png(4, 4, [1, 2, 3]),
        );

        let result = TestBuilder::new("smoke navigation")
            .navigate("https://example.test/")
            .checkpoint(
                "home",
                CaptureFlags { screenshot: true, html: true, console: true, network: false, performance: false },
            )
            .run_with_driver(config.clone(), &driver)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.checkpoints.len(), 1);
        assert_eq!(result.artifacts.len(), 3);

        let checkpoint = &result.checkpoints[0];
        let dom_store = crate::storage::dom_store::DomStore::new(&config);
        let html_ref = checkpoint.refs.html.clone().unwrap();
        let html = dom_store.retrieve(&html_ref).await.unwrap();
        assert!(html.contains("html"));

        let console_store = crate::storage::console_store::ConsoleStore::new(&config);
        let console_ref = checkpoint.refs.console.clone().unwrap();
        let collection = console_store.retrieve(&console_ref).await.unwrap();
        assert!(collection.entries.is_empty());

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    /// Scenario 2: one passing and one failing DOM assertion on the
    /// same checkpoint marks it (and the run) failed, and the failing
    /// assertion carries the real title as `actual`.
    #[tokio::test]
    async fn dom_assertion_mix_marks_checkpoint_and_run_failed() {
        let config = tmp_config("dom-assert");
        let driver = ScriptedDriver::new(
            "<html><head><title>Actual Title</title></head><body><h1>hi</h1></body></html>",
            vec![],
            vec![],
        );

        let result = TestBuilder::new("dom assertions")
            .navigate("https://example.test/")
            .checkpoint_with_validations(
                "home",
                CaptureFlags { screenshot: false, html: true, console: false, network: false, performance: false },
                Validations {
                    dom: vec![
                        DomAssertion::Exists { selector: "h1".into() },
                        DomAssertion::TextEquals { selector: "title".into(), value: "NotThisTitle".into() },
                    ],
                    console: None,
                },
            )
            .run_with_driver(config.clone(), &driver)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        let checkpoint = &result.checkpoints[0];
        assert_eq!(checkpoint.validations.len(), 2);
        assert!(checkpoint.validations[0].passed);
        assert!(!checkpoint.validations[1].passed);
        assert_eq!(checkpoint.validations[1].actual.as_deref(), Some("Actual Title"));

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    /// Scenario 3: `noErrors` with an allowed pattern excuses the
    /// deprecation warning's matching error sibling... here, a genuine
    /// error survives the allow-list and fails the checkpoint while the
    /// allowed one does not count.
    #[tokio::test]
    async fn console_error_gating_excuses_allowed_pattern_only() {
        let config = tmp_config("console-gate");
        let console = vec![
            console_entry(ConsoleLevel::Warn, "warn: deprecated"),
            console_entry(ConsoleLevel::Error, "error: payment failed"),
        ];
        let driver = ScriptedDriver::new("<html><body></body></html>", console, vec![]);

        let result = TestBuilder::new("console gating")
            .navigate("https://example.test/checkout")
            .checkpoint_with_validations(
                "checkout",
                CaptureFlags { screenshot: false, html: false, console: true, network: false, performance: false },
                Validations {
                    dom: vec![],
                    console: Some(ConsoleAssertions {
                        no_errors: true,
                        allowed: vec!["/deprecated/i".into()],
                        ..Default::default()
                    }),
                },
            )
            .run_with_driver(config.clone(), &driver)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        let checkpoint = &result.checkpoints[0];
        assert_eq!(checkpoint.validations.len(), 1);
        assert!(!checkpoint.validations[0].passed);
        assert!(checkpoint.validations[0].message.contains("payment failed"));

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    /// Scenario 4: a 4321-node document chunked at size 1000 yields
    /// chunks [1000,1000,1000,1000,321], and querying the stored
    /// document returns the same element count as querying the source
    /// HTML directly.
    #[tokio::test]
    async fn chunked_dom_roundtrip_preserves_chunk_sizes_and_query_count() {
        let config = tmp_config("dom-chunk");
        let dom_store = crate::storage::dom_store::DomStore::new(&config);
        dom_store.initialize().await.unwrap();

        let cards: String = (0..4321).map(|i| format!("<div class=\"card\">card {i}</div>")).collect();
        let html = format!("<html><body>{cards}</body></html>");

        let reference = dom_store
            .store("t-chunk", None, &html, "https://example.test/list", Some(1000))
            .await
            .unwrap();

        let (total_nodes, chunk_count) = dom_store.get_stats(&reference).await.unwrap();
        assert_eq!(total_nodes, 4321);
        assert_eq!(chunk_count, 5);

        let mut sizes = Vec::new();
        for i in 0..chunk_count {
            let chunk = dom_store.retrieve_chunk(&reference, i).await.unwrap();
            sizes.push(chunk.node_count);
        }
        assert_eq!(sizes, vec![1000, 1000, 1000, 1000, 321]);

        let stored_matches = dom_store.query_by_selector(&reference, "div.card").await.unwrap();
        let direct_matches = query_html_by_selector(&html, "div.card").unwrap();
        assert_eq!(stored_matches.len(), direct_matches.len());

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    /// Scenario 5: comparing an image to itself yields zero diff;
    /// perturbing a single RGB triple by +50 (sum 150 > 0.1*765=76.5)
    /// counts exactly one different pixel.
    #[test]
    fn screenshot_diff_respects_threshold_cutoff() {
        let a = solid_png(8, 8, [20, 20, 20]);
        let identical = ScreenshotStore::compare(&a, &a, 0.1).unwrap();
        assert_eq!(identical.different_pixels, 0);
        assert_eq!(identical.diff_percentage, 0.0);

        let mut img = image::load_from_memory(&a).unwrap().to_rgb8();
        let [r, g, b] = img.get_pixel(0, 0).0;
        img.put_pixel(0, 0, image::Rgb([r.wrapping_add(50), g, b]));
        let mut shifted = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut shifted), ImageFormat::Png)
            .unwrap();

        let diff = ScreenshotStore::compare(&a, &shifted, 0.1).unwrap();
        assert_eq!(diff.different_pixels, 1);
    }

    /// Scenario 6: two runs of the same test over an unchanged page
    /// compare their "home" screenshots below 0.01% diff.
    #[tokio::test]
    async fn checkpoint_to_checkpoint_comparison_is_stable_across_runs() {
        let config = tmp_config("checkpoint-cmp");
        let orchestrator = Orchestrator::without_pool(config.clone()).await.unwrap();
        let screenshot = solid_png(16, 16, [30, 60, 90]);

        let mut results = Vec::new();
        for _ in 0..2 {
            let driver = ScriptedDriver::new("<html><body><h1>hi</h1></body></html>", vec![], screenshot.clone());
            let definition = TestBuilder::new("repeat visit")
                .navigate("https://example.test/")
                .checkpoint(
                    "home",
                    CaptureFlags { screenshot: true, html: false, console: false, network: false, performance: false },
                )
                .build()
                .unwrap();
            results.push(orchestrator.run_with_driver(&definition, &driver).await);
        }

        assert_eq!(results[0].status, RunStatus::Passed);
        assert_eq!(results[1].status, RunStatus::Passed);

        let checkpoint_manager = crate::checkpoint_manager::CheckpointManager::new(&config);
        let comparison = checkpoint_manager
            .compare_checkpoints(&results[0].checkpoints[0], &results[1].checkpoints[0])
            .await
            .unwrap();
        assert!(comparison.screenshot_diff_percentage.unwrap() < 0.01);

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }
}
