//! End-to-end pack/unpack scenarios spanning collector, partitioner,
//! sealer, and unsealer together.

use std::fs;
use std::os::unix::fs::symlink;

use cryptoblob_core::error::CryptoBlobError;
use cryptoblob_core::primitives;
use cryptoblob_core::sealer::{self, KnownTenant};
use cryptoblob_core::unsealer;

fn write_file(root: &std::path::Path, relpath: &str, contents: &[u8]) {
    let path = root.join(relpath);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn empty_directory_produces_empty_blob() {
    let src = tempfile::tempdir().unwrap();
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    assert!(blob.xpartitions.is_empty());
    assert!(blob.xtenants.is_empty());

    let manifest = unsealer::unseal_master(&blob, &key).unwrap();
    assert!(manifest.files.iter().all(|(_, m)| m.is_empty()) || manifest.files.is_empty());
}

#[test]
fn one_master_file_roundtrips() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "master/a", b"abc");
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    assert_eq!(blob.xpartitions.len(), 1);

    let manifest = unsealer::unseal_master(&blob, &key).unwrap();
    let dest = tempfile::tempdir().unwrap();
    unsealer::writeout_master(&blob, &manifest, dest.path()).unwrap();
    assert_eq!(fs::read(dest.path().join("master/a")).unwrap(), b"abc");
}

#[test]
fn identical_bytes_across_master_and_tenant_dedup_into_one_shared_partition() {
    // Bodies are deduplicated globally by raw bytes (not per-principal), so
    // master/x and tenants/one/x, sharing the same contents, resolve to one
    // body whose visibility set is the union {"", "one"} — one partition,
    // not two.
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "master/x", b"k");
    write_file(src.path(), "tenants/one/x", b"k");
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();

    let manifest = unsealer::unseal_master(&blob, &key).unwrap();
    let master_item = manifest
        .principal_files("")
        .unwrap()
        .iter()
        .find(|(p, _)| p == "x")
        .unwrap()
        .1
        .partition_id;
    let tenant_item = manifest
        .principal_files("one")
        .unwrap()
        .iter()
        .find(|(p, _)| p == "x")
        .unwrap()
        .1
        .partition_id;
    assert_eq!(master_item, tenant_item);
    assert_eq!(blob.xpartitions.len(), 1);
}

#[test]
fn distinct_bytes_in_different_visibility_sets_land_in_different_partitions() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "master/x", b"master-only-bytes");
    write_file(src.path(), "tenants/one/x", b"tenant-only-bytes");
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();

    let manifest = unsealer::unseal_master(&blob, &key).unwrap();
    let master_item = manifest
        .principal_files("")
        .unwrap()
        .iter()
        .find(|(p, _)| p == "x")
        .unwrap()
        .1
        .partition_id;
    let tenant_item = manifest
        .principal_files("one")
        .unwrap()
        .iter()
        .find(|(p, _)| p == "x")
        .unwrap()
        .1
        .partition_id;
    assert_ne!(master_item, tenant_item);
    assert_eq!(blob.xpartitions.len(), 2);
}

#[test]
fn shared_body_across_two_tenants_dedups_into_one_partition() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "tenants/one/b", b"v");
    write_file(src.path(), "tenants/two/b", b"v");
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    assert_eq!(blob.xpartitions.len(), 1);

    let manifest = unsealer::unseal_master(&blob, &key).unwrap();
    let one = manifest
        .tenants_keys
        .iter()
        .find(|t| t.tenant_name == "one")
        .unwrap();
    let two = manifest
        .tenants_keys
        .iter()
        .find(|t| t.tenant_name == "two")
        .unwrap();
    let reader_one = sealer::reader_key_from_bytes(&one.reader_key).unwrap();
    let reader_two = sealer::reader_key_from_bytes(&two.reader_key).unwrap();
    let manifest_one = unsealer::unseal_tenant(&blob, one.key_id, &reader_one).unwrap();
    let manifest_two = unsealer::unseal_tenant(&blob, two.key_id, &reader_two).unwrap();
    assert!(!manifest_one.partition_keys[0].is_empty());
    assert!(!manifest_two.partition_keys[0].is_empty());
}

#[test]
fn forgotten_tenant_gets_new_key_id_and_old_reader_key_fails() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "tenants/one/secret", b"s3cr3t");
    let key = primitives::new_key();

    let first = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    let first_manifest = unsealer::unseal_master(&first, &key).unwrap();
    let first_one = first_manifest
        .tenants_keys
        .iter()
        .find(|t| t.tenant_name == "one")
        .unwrap();
    assert_eq!(first_one.key_id, 1);
    let old_reader = sealer::reader_key_from_bytes(&first_one.reader_key).unwrap();

    // Forget tenant "one" entirely: pack again with no known tenants, but
    // carry forward the max_id counter as a real orchestrator would.
    let second = sealer::pack(src.path(), &key, first.max_id, &[]).unwrap();
    let second_manifest = unsealer::unseal_master(&second, &key).unwrap();
    let second_one = second_manifest
        .tenants_keys
        .iter()
        .find(|t| t.tenant_name == "one")
        .unwrap();
    assert!(second_one.key_id > first_one.key_id);

    assert!(matches!(
        unsealer::unseal_tenant(&second, second_one.key_id, &old_reader),
        Err(CryptoBlobError::CryptoError)
    ));
}

#[test]
fn bad_symlink_escaping_principal_root_fails_to_pack() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("master")).unwrap();
    fs::create_dir_all(src.path().join("tenants/one")).unwrap();
    fs::write(src.path().join("tenants/one/secret"), b"s3cr3t").unwrap();
    symlink("../tenants/one/secret", src.path().join("master/link")).unwrap();

    let key = primitives::new_key();
    let err = sealer::pack(src.path(), &key, 0, &[]).unwrap_err();
    assert!(matches!(err, CryptoBlobError::OutOfTree(_)));
}

#[test]
fn flipping_a_bit_in_xmaster_fails_decryption() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "master/a", b"abc");
    let key = primitives::new_key();
    let mut blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    let last = blob.xmaster.len() - 1;
    blob.xmaster[last] ^= 0xFF;
    assert!(matches!(
        unsealer::unseal_master(&blob, &key),
        Err(CryptoBlobError::CryptoError)
    ));
}

#[test]
fn dump_load_is_identity_on_well_formed_blob() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "master/a", b"abc");
    write_file(src.path(), "tenants/one/b", b"def");
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    let dumped = blob.dump_to_blob().unwrap();
    let loaded = cryptoblob_core::CryptoBlob::load_from_blob(&dumped).unwrap();
    assert_eq!(loaded, blob);
}

#[test]
fn tenant_holes_are_empty_for_unused_partitions() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "master/only-master", b"m");
    write_file(src.path(), "tenants/one/only-one", b"1");
    let key = primitives::new_key();
    let blob = sealer::pack(src.path(), &key, 0, &[]).unwrap();
    let manifest = unsealer::unseal_master(&blob, &key).unwrap();
    let one = manifest
        .tenants_keys
        .iter()
        .find(|t| t.tenant_name == "one")
        .unwrap();
    let reader = sealer::reader_key_from_bytes(&one.reader_key).unwrap();
    let tenant_manifest = unsealer::unseal_tenant(&blob, one.key_id, &reader).unwrap();

    // two partitions: {""} for only-master, {"one"} for only-one
    assert_eq!(tenant_manifest.partition_keys.len(), 2);
    let non_empty = tenant_manifest
        .partition_keys
        .iter()
        .filter(|k| !k.is_empty())
        .count();
    assert_eq!(non_empty, 1);
}

#[test]
fn max_id_is_non_decreasing_across_successive_packs() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "tenants/one/a", b"1");
    let key = primitives::new_key();
    let first = sealer::pack(src.path(), &key, 0, &[]).unwrap();

    let manifest = unsealer::unseal_master(&first, &key).unwrap();
    let known: Vec<KnownTenant> = manifest
        .tenants_keys
        .iter()
        .map(|t| KnownTenant {
            name: t.tenant_name.clone(),
            key_id: t.key_id,
            writer_key: t.writer_key.clone(),
            reader_key: t.reader_key.clone(),
        })
        .collect();

    let second = sealer::pack(src.path(), &key, first.max_id, &known).unwrap();
    assert!(second.max_id >= first.max_id);
}

#[test]
fn relative_symlink_escaping_via_dotdot_fails_before_partitioning() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("tenants/one/sub")).unwrap();
    symlink(
        "../../../escape",
        src.path().join("tenants/one/sub/link"),
    )
    .unwrap();
    let key = primitives::new_key();
    let err = sealer::pack(src.path(), &key, 0, &[]).unwrap_err();
    assert!(matches!(err, CryptoBlobError::OutOfTree(_)));
}

#[test]
fn absolute_symlink_into_another_tenant_is_rejected() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("tenants/one")).unwrap();
    fs::create_dir_all(src.path().join("tenants/two")).unwrap();
    fs::write(src.path().join("tenants/two/secret"), b"nope").unwrap();
    let absolute_target = src
        .path()
        .canonicalize()
        .unwrap()
        .join("tenants/two/secret");
    symlink(&absolute_target, src.path().join("tenants/one/link")).unwrap();

    let key = primitives::new_key();
    let err = sealer::pack(src.path(), &key, 0, &[]).unwrap_err();
    assert!(matches!(err, CryptoBlobError::OutOfTree(_)));
}
