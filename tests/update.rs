use std::fs;

use audiometa::{
    ApeContainer, ContainerClass, ErrorKind, FieldId, FlacContainer, Id3Container, Id3Version,
    Picture, StreamInfo,
};

const AUDIO: &[u8] = b"\xff\xfb\x90\x00AUDIOPAYLOADAUDIOPAYLOADAUDIOPAYLOAD";

fn streaminfo() -> StreamInfo {
    StreamInfo {
        min_block_size: 4096,
        max_block_size: 4096,
        min_frame_size: 0,
        max_frame_size: 0,
        sample_rate: 44100,
        channels: 2,
        bits_per_sample: 16,
        total_samples: 500_000,
        md5: [0; 16],
    }
}

fn temp_file(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

#[track_caller]
fn assert_audio_tail(path: &std::path::Path) {
    let data = fs::read(path).unwrap();
    assert!(data.ends_with(AUDIO), "audio payload was damaged");
}

#[test]
fn flac_growth_absorbed_by_padding() {
    let (_dir, path) = temp_file("test.flac");

    let mut tag = FlacContainer::new(streaminfo());
    tag.set_field(FieldId::Title, "short");
    tag.set_padding(1024);
    let mut data = Vec::new();
    tag.write_to(&mut data).unwrap();
    data.extend_from_slice(AUDIO);
    fs::write(&path, &data).unwrap();
    let old_len = fs::metadata(&path).unwrap().len();

    let mut tag = FlacContainer::read_from_path(&path).unwrap();
    let before = tag.len();
    tag.set_field(FieldId::Title, "a considerably longer title than before");
    let growth = tag.len() - before;
    assert!(growth > 0);
    audiometa::update(&mut tag, &path).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), old_len);
    assert_audio_tail(&path);

    let parsed = FlacContainer::read_from_path(&path).unwrap();
    assert_eq!(
        parsed.get_field(FieldId::Title),
        Some("a considerably longer title than before")
    );
    assert_eq!(parsed.padding(), 1024 - growth);
}

#[test]
fn flac_shrink_grows_padding_in_place() {
    let (_dir, path) = temp_file("test.flac");

    let mut tag = FlacContainer::new(streaminfo());
    tag.set_field(FieldId::Title, "a considerably longer title than after");
    tag.set_padding(64);
    let mut data = Vec::new();
    tag.write_to(&mut data).unwrap();
    data.extend_from_slice(AUDIO);
    fs::write(&path, &data).unwrap();
    let old_len = fs::metadata(&path).unwrap().len();

    let mut tag = FlacContainer::read_from_path(&path).unwrap();
    let before = tag.len();
    tag.set_field(FieldId::Title, "t");
    let shrink = before - tag.len();
    assert!(shrink > 0);
    audiometa::update(&mut tag, &path).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), old_len);
    assert_audio_tail(&path);

    let parsed = FlacContainer::read_from_path(&path).unwrap();
    assert_eq!(parsed.get_field(FieldId::Title), Some("t"));
    assert_eq!(parsed.padding(), 64 + shrink);
}

#[test]
fn flac_growth_beyond_padding_rewrites() {
    let (_dir, path) = temp_file("test.flac");

    let mut tag = FlacContainer::new(streaminfo());
    tag.set_field(FieldId::Title, "a title");
    tag.set_padding(16);
    let mut data = Vec::new();
    tag.write_to(&mut data).unwrap();
    data.extend_from_slice(AUDIO);
    fs::write(&path, &data).unwrap();
    let old_len = fs::metadata(&path).unwrap().len();

    let mut tag = FlacContainer::read_from_path(&path).unwrap();
    let before = tag.len();
    tag.add_picture(Picture::front_cover("image/png", vec![0; 4096]));
    let growth = tag.len() - before;
    assert!(growth > 16);
    audiometa::update(&mut tag, &path).unwrap();

    // The rewrite consumes the padding entirely.
    assert_eq!(fs::metadata(&path).unwrap().len(), old_len + growth - 16);
    assert_audio_tail(&path);

    let parsed = FlacContainer::read_from_path(&path).unwrap();
    assert_eq!(parsed.pictures().count(), 1);
    assert_eq!(parsed.padding(), 0);
}

#[test]
fn flac_update_on_foreign_file_fails_fast() {
    let (_dir, path) = temp_file("test.mp3");

    let mut id3 = Id3Container::new(Id3Version::V24);
    id3.set_field(FieldId::Title, "a title");
    let mut data = Vec::new();
    id3.write_to(&mut data).unwrap();
    data.extend_from_slice(AUDIO);
    fs::write(&path, &data).unwrap();

    let mut tag = FlacContainer::new(streaminfo());
    let err = audiometa::update(&mut tag, &path).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ForeignContainer(ContainerClass::Flac)));

    // A fail-fast update leaves the file untouched.
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn id3_growth_absorbed_by_padding() {
    let (_dir, path) = temp_file("test.mp3");

    let mut tag = Id3Container::new(Id3Version::V24);
    tag.set_field(FieldId::Title, "short");
    tag.set_padding(256);
    let mut data = Vec::new();
    tag.write_to(&mut data).unwrap();
    data.extend_from_slice(AUDIO);
    fs::write(&path, &data).unwrap();
    let old_len = fs::metadata(&path).unwrap().len();

    let mut tag = Id3Container::read_from_path(&path).unwrap();
    let before = tag.len();
    tag.set_field(FieldId::Title, "a considerably longer title than before");
    let growth = tag.len() - before;
    assert!(growth > 0);
    audiometa::update(&mut tag, &path).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), old_len);
    assert_audio_tail(&path);

    let parsed = Id3Container::read_from_path(&path).unwrap();
    assert_eq!(
        parsed.get_field(FieldId::Title),
        Some("a considerably longer title than before")
    );
    assert_eq!(parsed.padding(), 256 - growth);
}

#[test]
fn id3_tag_added_to_untagged_file() {
    let (_dir, path) = temp_file("test.mp3");
    fs::write(&path, AUDIO).unwrap();

    let mut tag = Id3Container::new(Id3Version::V23);
    tag.set_field(FieldId::Artist, "an artist");
    audiometa::update(&mut tag, &path).unwrap();

    let data = fs::read(&path).unwrap();
    assert!(data.starts_with(b"ID3"));
    assert_eq!(data.len() as u64, tag.len() + AUDIO.len() as u64);
    assert_audio_tail(&path);

    let parsed = Id3Container::read_from_path(&path).unwrap();
    assert_eq!(parsed.version, Id3Version::V23);
    assert_eq!(parsed.get_field(FieldId::Artist), Some("an artist"));
}

#[test]
fn ape_update_rewrites_trailing_tag() {
    let (_dir, path) = temp_file("test.ape");

    let mut tag = ApeContainer::new();
    tag.set_field(FieldId::Title, "a title");
    let mut data = AUDIO.to_vec();
    tag.write_to(&mut data).unwrap();
    fs::write(&path, &data).unwrap();

    let mut tag = ApeContainer::read_from_path(&path).unwrap();
    tag.set_field(FieldId::Album, "an album");
    audiometa::update(&mut tag, &path).unwrap();

    let data = fs::read(&path).unwrap();
    assert!(data.starts_with(AUDIO), "audio payload was damaged");
    assert_eq!(data.len() as u64, AUDIO.len() as u64 + tag.len());

    let parsed = ApeContainer::read_from_path(&path).unwrap();
    assert_eq!(parsed.get_field(FieldId::Title), Some("a title"));
    assert_eq!(parsed.get_field(FieldId::Album), Some("an album"));
}

#[test]
fn ape_tag_added_to_untagged_file() {
    let (_dir, path) = temp_file("test.ape");
    fs::write(&path, AUDIO).unwrap();

    let mut tag = ApeContainer::new();
    tag.set_field(FieldId::Title, "a title");
    audiometa::update(&mut tag, &path).unwrap();

    let data = fs::read(&path).unwrap();
    assert!(data.starts_with(AUDIO));
    assert_eq!(data.len() as u64, AUDIO.len() as u64 + tag.len());

    let parsed = ApeContainer::read_from_path(&path).unwrap();
    assert_eq!(parsed.get_field(FieldId::Title), Some("a title"));
}
