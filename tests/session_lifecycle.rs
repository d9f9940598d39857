//! End-to-end session lifecycle tests against the fixture engine

use std::io::Write;

use pdfcore_session::engine::{
    FixtureBookmark, FixtureDocument, FixtureEngine, FixtureLink, FixturePage, HandleKind,
};
use pdfcore_session::{CoreError, DocumentSource, LinkTarget, PdfCore, Rect};

fn three_page_document() -> FixtureDocument {
    FixtureDocument::new()
        .with_metadata("Title", "Lifecycle")
        .with_metadata("Author", "Fixture")
        .with_page(
            FixturePage::letter()
                .with_text("Chapter one\nThe quick brown fox")
                .with_link(FixtureLink {
                    rect: [72.0, 720.0, 138.0, 710.0],
                    page: Some(2),
                    uri: None,
                }),
        )
        .with_page(FixturePage::letter().with_text("Chapter two\nfox and hound"))
        .with_page(FixturePage::new(420.0, 595.0).with_text("Appendix"))
        .with_bookmark(
            FixtureBookmark::new("Part I", Some(0))
                .with_child(FixtureBookmark::new("Chapter one", Some(0)))
                .with_child(FixtureBookmark::new("Chapter two", Some(1))),
        )
        .with_bookmark(FixtureBookmark::new("Appendix", Some(2)))
}

#[test]
fn test_three_page_scenario() {
    let core = PdfCore::new(FixtureEngine::new());
    let session = core
        .open(three_page_document().to_bytes().unwrap(), None)
        .unwrap();

    assert_eq!(session.page_count().unwrap(), 3);
    assert_eq!(session.metadata().unwrap().title.as_deref(), Some("Lifecycle"));

    // outline shape
    let toc = session.table_of_contents().unwrap();
    assert_eq!(toc.len(), 2);
    assert_eq!(toc[0].children.len(), 2);
    assert_eq!(toc[0].children[1].page_index, Some(1));
    assert_eq!(toc[1].title, "Appendix");

    // pages and links
    let handles = session.open_pages(0, 2).unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(session.open_page(1).unwrap(), handles[1]);
    let links = session.page_links(0).unwrap();
    assert_eq!(links[0].target, LinkTarget::Page(2));

    // text
    let count = session.count_characters(1).unwrap();
    let text = session.extract_range(1, 0, count).unwrap();
    assert_eq!(text, "Chapter two\nfox and hound");

    // absent pattern: no results and no first hit
    let mut missing = session.search(2, "zebra").unwrap();
    assert_eq!(missing.count_results(), Some(0));
    assert_eq!(missing.next().unwrap(), None);
    drop(missing);

    // search across pages
    let mut total = 0;
    for index in 0..3 {
        let mut cursor = session.search(index, "fox").unwrap();
        total += cursor.collect_forward().unwrap().len();
    }
    assert_eq!(total, 2);

    session.close();
    let audit = core.with_engine(|e| e.audit());
    assert!(audit.is_clean());
    assert_eq!(audit.violations, 0);
}

#[test]
fn test_out_of_range_page_leaves_cache_untouched() {
    let core = PdfCore::new(FixtureEngine::new());
    let session = core
        .open(three_page_document().to_bytes().unwrap(), None)
        .unwrap();
    session.open_page(2).unwrap();

    let err = session.open_page(5).unwrap_err();
    assert!(matches!(err, CoreError::Index { index: 5, count: 3 }));
    assert_eq!(session.cached_pages(), vec![2]);
    assert!(!session.has_text_page(5));
}

#[test]
fn test_close_order_and_repeat() {
    let core = PdfCore::new(FixtureEngine::new());
    let session = core
        .open(three_page_document().to_bytes().unwrap(), None)
        .unwrap();
    session.prepare_text_pages(0, 2).unwrap();
    let first = session.search(0, "quick").unwrap();
    let second = session.search(1, "hound").unwrap();
    // cursors stay registered past their owners here
    std::mem::forget(first);
    std::mem::forget(second);

    session.close();
    session.close();

    let kinds: Vec<HandleKind> =
        core.with_engine(|e| e.release_log().iter().map(|r| r.kind).collect());
    let position = |kind: HandleKind| kinds.iter().rposition(|k| *k == kind).unwrap();
    let first_of = |kind: HandleKind| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(position(HandleKind::Search) < first_of(HandleKind::TextPage));
    assert!(position(HandleKind::TextPage) < first_of(HandleKind::Page));
    assert_eq!(kinds.last(), Some(&HandleKind::Document));
    assert_eq!(kinds.len(), 2 + 3 + 3 + 1);
    assert_eq!(core.with_engine(|e| e.audit().violations), 0);
}

#[test]
fn test_round_trip_against_character_unicode() {
    let core = PdfCore::new(FixtureEngine::new());
    let session = core
        .open(three_page_document().to_bytes().unwrap(), None)
        .unwrap();

    let count = session.count_characters(0).unwrap();
    let text = session.extract_range(0, 0, count).unwrap();
    let units: Vec<u32> = (0..count)
        .map(|i| session.character_unicode(0, i).unwrap())
        .collect();
    assert_eq!(units, text.chars().map(|c| c as u32).collect::<Vec<_>>());

    let full = Rect::new(0.0, 792.0, 612.0, 0.0);
    let bounded = session.extract_bounded(0, full).unwrap().unwrap();
    assert_eq!(bounded, text);
    let length = session.bounded_text_length(0, full).unwrap();
    assert_eq!(bounded.encode_utf16().count(), length);
    assert!(length <= count + 1);
}

#[test]
fn test_concurrent_callers_share_one_handle_per_page() {
    let core = PdfCore::new(FixtureEngine::new());
    let session = core
        .open(three_page_document().to_bytes().unwrap(), None)
        .unwrap();

    let receipts: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let session = &session;
                scope.spawn(move || {
                    let index = worker % 3;
                    let handle = session.open_page(index).unwrap();
                    let text = session.extract_page_text(index).unwrap();
                    let toc = session.table_of_contents().unwrap();
                    assert!(!text.is_empty());
                    assert_eq!(toc.len(), 2);
                    handle
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for (worker, receipt) in receipts.iter().enumerate() {
        assert_eq!(*receipt, receipts[worker % 3]);
    }
    let audit = core.with_engine(|e| e.audit());
    assert_eq!(audit.page_loads, 3);
    assert_eq!(audit.text_page_loads, 3);
    assert_eq!(audit.violations, 0);
}

#[test]
fn test_sessions_on_one_core_are_independent() {
    let core = PdfCore::new(FixtureEngine::new());
    let bytes = three_page_document().to_bytes().unwrap();
    let a = core.open(bytes.clone(), None).unwrap();
    let b = core.open(bytes, None).unwrap();

    let page_a = a.open_page(0).unwrap();
    b.open_page(0).unwrap();
    assert!(!b.is_current(&page_a));

    a.close();
    assert!(b.has_page(0));
    assert_eq!(b.extract_page_text(2).unwrap(), "Appendix");
}

#[test]
fn test_file_backed_source() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&three_page_document().to_bytes().unwrap())
        .unwrap();
    file.flush().unwrap();

    let core = PdfCore::new(FixtureEngine::new());
    let source = DocumentSource::from_path(file.path()).unwrap();
    let session = core.open(source, None).unwrap();
    assert!(session.is_file_backed());
    assert_eq!(session.page_count().unwrap(), 3);
    assert_eq!(session.page_width_points(2).unwrap(), 420);

    drop(session);
    assert!(core.with_engine(|e| e.audit().is_clean()));
}

#[test]
fn test_cyclic_outline_is_reported() {
    let mut doc = three_page_document();
    doc.outline_overrides
        .push(pdfcore_session::engine::OutlineOverride {
            node: 3,
            next_sibling: Some(0),
            first_child: None,
            end_of_chain: false,
        });
    let core = PdfCore::new(FixtureEngine::new());
    let session = core.open(doc.to_bytes().unwrap(), None).unwrap();

    assert!(matches!(
        session.table_of_contents(),
        Err(CoreError::MalformedOutline(_))
    ));
    // the session stays usable
    assert_eq!(session.page_count().unwrap(), 3);
}
