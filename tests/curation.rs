use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use clld_meta::curation::{CuratedList, NotCldfList, Selection};
use clld_meta::domain::RecordId;
use clld_meta::error::MetaError;
use clld_meta::store::Store;

fn project() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::create_dir_all(root.join("etc")).unwrap();
    (temp, Store::new(root))
}

#[test]
fn curated_list_accepts_links_and_comments() {
    let (_temp, store) = project();
    fs::write(
        store.blacklist_path(),
        "ID,Comment\n\
         3603755,superseded\n\
         # 1111,commented out\n\
         https://zenodo.org/records/4137477,\"talk, not data\"\n\
         \n\
         oai:zenodo.org:12\n",
    )
    .unwrap();

    let list = CuratedList::load(&store.blacklist_path()).unwrap();
    assert_eq!(list.len(), 3);
    assert!(list.contains(RecordId::new(4137477)));
    assert!(!list.contains(RecordId::new(1111)));
    assert_eq!(list.comment(RecordId::new(4137477)), Some("talk, not data"));
    assert_eq!(list.comment(RecordId::new(12)), Some(""));
}

#[test]
fn missing_lists_are_empty() {
    let (_temp, store) = project();
    let selection = Selection::load(&store).unwrap();
    assert!(selection.blacklist.is_empty());
    assert!(selection.whitelist.is_empty());
    assert!(selection.is_selected(RecordId::new(1)));
}

#[test]
fn invalid_ids_are_reported() {
    let (_temp, store) = project();
    fs::write(store.whitelist_path(), "ID,Comment\nnot-an-id,oops\n").unwrap();
    assert_matches!(
        CuratedList::load(&store.whitelist_path()),
        Err(MetaError::ListRead { .. })
    );
}

#[test]
fn not_cldf_list_round_trip_stays_sorted() {
    let (_temp, store) = project();
    fs::write(store.not_cldf_path(), "ID,File\n20,b/.zenodo.json\n").unwrap();

    let mut list = NotCldfList::load(&store.not_cldf_path()).unwrap();
    assert!(list.contains(RecordId::new(20), "b/.zenodo.json"));
    assert!(list.insert(RecordId::new(3), "a\\package.json"));
    assert!(!list.insert(RecordId::new(20), "b/.zenodo.json"));
    assert_eq!(list.added(), 1);
    list.save().unwrap();

    assert_eq!(
        fs::read_to_string(store.not_cldf_path()).unwrap(),
        "ID,File\n3,a/package.json\n20,b/.zenodo.json\n"
    );
    let reloaded = NotCldfList::load(&store.not_cldf_path()).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.added(), 0);
}

#[test]
fn not_cldf_entries_outside_the_dataset_are_dropped() {
    let (_temp, store) = project();
    fs::write(
        store.not_cldf_path(),
        "ID,File\n1,../../../clld-meta.json\n1,/etc/passwd\n1,cldf/../../x.json\n1,./ok/.zenodo.json\n",
    )
    .unwrap();

    let list = NotCldfList::load(&store.not_cldf_path()).unwrap();
    assert_eq!(
        list.entries().collect::<Vec<_>>(),
        vec![(RecordId::new(1), "./ok/.zenodo.json")]
    );
}
