mod common;

use common::{tags, EagleLibrary};
use std::fs;
use tag_sync::scanner::scan_library;
use tag_sync::Error;

#[test]
fn test_scan_reads_items_and_skips_broken_folders() {
    let library = EagleLibrary::new();
    library.add_item("AAA", "holiday", &["beach", "family", ""]);
    library.add_item("BBB", "untagged", &[]);
    // folder without metadata.json
    fs::create_dir_all(library.info_dir("CCC")).unwrap();
    // metadata pointing at a missing media file
    let ddd = library.info_dir("DDD");
    fs::create_dir_all(&ddd).unwrap();
    fs::write(
        ddd.join("metadata.json"),
        r#"{"name": "gone", "ext": "mkv", "tags": ["x"]}"#,
    )
    .unwrap();
    // not an item folder
    fs::create_dir_all(library.root().join("images").join("stray")).unwrap();

    let scan = scan_library(library.root()).unwrap();

    assert_eq!(scan.items.len(), 2);
    assert_eq!(scan.unreadable, 2);
    assert_eq!(scan.tagged(), 1);

    let holiday = &scan.items[0];
    assert_eq!(holiday.display_name, "holiday");
    assert_eq!(holiday.tags, tags(&["beach", "family"]));
    assert_eq!(holiday.file_name(), "holiday.mp4");
    assert_eq!(
        holiday.container_path,
        fs::canonicalize(library.info_dir("AAA")).unwrap()
    );
}

#[test]
fn test_extension_match_ignores_case_and_thumbnails() {
    let library = EagleLibrary::new();
    let info = library.info_dir("EEE");
    fs::create_dir_all(&info).unwrap();
    fs::write(
        info.join("metadata.json"),
        r#"{"name": "", "ext": "MOV", "tags": ["a"]}"#,
    )
    .unwrap();
    fs::write(info.join("clip_thumbnail.mov"), b"thumb").unwrap();
    fs::write(info.join("clip.mov"), b"video").unwrap();

    let scan = scan_library(library.root()).unwrap();

    assert_eq!(scan.items.len(), 1);
    assert_eq!(scan.items[0].file_name(), "clip.mov");
    // empty name falls back to the file stem
    assert_eq!(scan.items[0].display_name, "clip");
}

#[test]
fn test_missing_root_or_images_is_unavailable() {
    let library = EagleLibrary::new();
    let missing = library.root().join("nope");
    assert!(matches!(
        scan_library(&missing),
        Err(Error::SourceUnavailable(_))
    ));

    fs::remove_dir_all(library.root().join("images")).unwrap();
    assert!(matches!(
        scan_library(library.root()),
        Err(Error::SourceUnavailable(_))
    ));
}
