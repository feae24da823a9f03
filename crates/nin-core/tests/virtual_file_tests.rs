//! Virtual file fidelity: a tree copied piece by piece through a source view
//! and a destination view comes out byte-identical.

mod common;

use nin_core::file::{Manifest, VirtualFile};

use common::*;

fn copy_through_views(
    source: &std::path::Path,
    download: &std::path::Path,
    piece_length: u32,
) -> Manifest {
    let (manifest, source_view) =
        Manifest::generate_with_piece_length(source, piece_length).expect("manifest");
    let mut destination = VirtualFile::for_destination(&manifest, download).expect("destination");

    for index in 0..u32::try_from(manifest.piece_count()).expect("piece count") {
        let piece = source_view
            .read_piece(index, manifest.piece_length)
            .expect("read piece");
        assert_eq!(piece.len() as u64, manifest.piece_size(index));
        assert!(manifest.verify_piece(index, &piece), "piece {index} hash");

        let written = destination
            .write_at(manifest.piece_offset(index), &piece)
            .expect("write piece");
        assert_eq!(written, piece.len());
    }

    assert_eq!(destination.checksum().expect("checksum"), manifest.checksum);
    destination.close().expect("close");
    manifest
}

#[test]
fn test_tree_fidelity_across_piece_sizes() {
    let temp_dir = create_temp_dir();
    let source = create_test_directory(temp_dir.path(), "tree");

    for piece_length in [1_000, 4096, 65_536, 512 * 1024] {
        let download = temp_dir.path().join(format!("out-{piece_length}"));
        let manifest = copy_through_views(&source, &download, piece_length);

        assert_eq!(manifest.members.len(), 6);
        assert_trees_equal(&source, &download.join("tree"));
    }
}

#[test]
fn test_single_file_fidelity() {
    let temp_dir = create_temp_dir();
    let source = create_test_file(temp_dir.path(), "in/blob.bin", &random_bytes(1_351_680));
    let download = temp_dir.path().join("out");

    let manifest = copy_through_views(&source, &download, nin_core::PIECE_LENGTH);

    assert!(manifest.single);
    assert_eq!(manifest.piece_count(), 3);
    assert_files_equal(&source, &download.join("blob.bin"));
}

#[test]
fn test_out_of_order_writes() {
    let temp_dir = create_temp_dir();
    let source = create_test_directory(temp_dir.path(), "shuffled");
    let download = temp_dir.path().join("out");

    let (manifest, source_view) =
        Manifest::generate_with_piece_length(&source, 10_000).expect("manifest");
    let mut destination = VirtualFile::for_destination(&manifest, &download).expect("destination");

    let count = u32::try_from(manifest.piece_count()).expect("piece count");
    let odd_then_even = (0..count)
        .rev()
        .filter(|i| i % 2 == 1)
        .chain((0..count).filter(|i| i % 2 == 0));
    for index in odd_then_even {
        let piece = source_view
            .read_piece(index, manifest.piece_length)
            .expect("read piece");
        destination
            .write_at(manifest.piece_offset(index), &piece)
            .expect("write piece");
    }
    destination.close().expect("close");

    assert_trees_equal(&source, &download.join("shuffled"));
}
