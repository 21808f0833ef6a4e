use audiometa::flac::SeekPoint;
use audiometa::id3::{decode_syncsafe, encode_syncsafe, SYNCSAFE_MAX};
use audiometa::{
    ApeContainer, ApeItem, Block, BlockType, FieldId, FlacContainer, FormattingOptions,
    Id3Container, Id3Version, Record, StreamInfo,
};

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

#[track_caller]
fn assert_fields<T>(tag: &T, get: impl Fn(&T, FieldId) -> Option<String>) {
    assert_eq!(get(tag, FieldId::Title).as_deref(), Some("a title"));
    assert_eq!(get(tag, FieldId::Artist).as_deref(), Some("än ártist"));
    assert_eq!(get(tag, FieldId::Album).as_deref(), Some("an album"));
    assert_eq!(get(tag, FieldId::TrackNumber).as_deref(), Some("2/9"));
    assert_eq!(get(tag, FieldId::DiscNumber).as_deref(), Some("1"));
    assert_eq!(get(tag, FieldId::Year).as_deref(), Some("2004"));
}

fn set_fields(mut set: impl FnMut(FieldId, &str)) {
    set(FieldId::Title, "a title");
    set(FieldId::Artist, "än ártist");
    set(FieldId::Album, "an album");
    set(FieldId::TrackNumber, "2/9");
    set(FieldId::DiscNumber, "1");
    set(FieldId::Year, "2004");
}

#[test]
fn flac_round_trip() {
    let mut tag = FlacContainer::new(streaminfo());
    set_fields(|id, v| tag.set_field(id, v));
    tag.add_picture(audiometa::Picture::front_cover("image/png", vec![1, 2, 3, 4]));
    tag.set_padding(2048);

    let mut buf = Vec::new();
    tag.write_to(&mut buf).unwrap();
    let parsed = FlacContainer::read_from(&mut buf.as_slice()).unwrap();

    assert_fields(&parsed, |t, id| t.get_field(id).map(str::to_owned));
    assert_eq!(parsed.streaminfo(), Some(&streaminfo()));
    assert_eq!(parsed.pictures().count(), 1);
    assert_eq!(parsed.padding(), 2048);

    let mut buf2 = Vec::new();
    parsed.write_to(&mut buf2).unwrap();
    assert_eq!(buf, buf2);
}

#[test]
fn id3_round_trip_per_version() {
    for version in [Id3Version::V22, Id3Version::V23, Id3Version::V24] {
        let mut tag = Id3Container::new(version);
        set_fields(|id, v| tag.set_field(id, v));
        tag.set_comment(*b"eng", "", "a comment");
        tag.set_padding(512);

        let mut buf = Vec::new();
        tag.write_to(&mut buf).unwrap();
        let parsed = Id3Container::read_from(&mut buf.as_slice()).unwrap();

        assert_fields(&parsed, |t, id| t.get_field(id).map(str::to_owned));
        assert_eq!(parsed.get_field(FieldId::Comment), Some("a comment"));
        assert_eq!(parsed.version, version);
        assert_eq!(parsed.padding(), 512);

        let mut buf2 = Vec::new();
        parsed.write_to(&mut buf2).unwrap();
        assert_eq!(buf, buf2, "unstable {} rendering", version);
    }
}

#[test]
fn ape_round_trip() {
    let mut tag = ApeContainer::new();
    set_fields(|id, v| tag.set_field(id, v));
    tag.set_item(ApeItem::binary("Cover Art (Front)", vec![0xff, 0xd8]));

    let mut buf = Vec::new();
    tag.write_to(&mut buf).unwrap();
    let parsed = ApeContainer::read_trailing(&mut std::io::Cursor::new(&buf)).unwrap();

    assert_fields(&parsed, |t, id| t.get_field(id).map(str::to_owned));
    assert_eq!(parsed.get_item("Cover Art (Front)").unwrap().value, vec![0xff, 0xd8]);

    let mut buf2 = Vec::new();
    parsed.write_to(&mut buf2).unwrap();
    assert_eq!(buf, buf2);
}

#[test]
fn syncsafe_is_bijective() {
    // Exhausting all 2^28 values takes too long; sample the edges of every byte boundary.
    let mut n = 0u32;
    while n <= SYNCSAFE_MAX {
        assert_eq!(decode_syncsafe(encode_syncsafe(n).unwrap()).unwrap(), n);
        n = n.saturating_mul(3).saturating_add(1).min(SYNCSAFE_MAX + 1);
    }
    assert!(encode_syncsafe(SYNCSAFE_MAX + 1).is_err());
}

#[test]
fn streaminfo_stays_first() {
    let mut tag = FlacContainer::new(streaminfo());
    tag.set_field(FieldId::Title, "t");
    tag.set_padding(64);
    tag.add_block(Block::SeekTable(audiometa::flac::SeekTable {
        points: vec![SeekPoint { sample_offset: 0, byte_offset: 0, frame_count: 4096 }],
    }));

    let mut replacement = streaminfo();
    replacement.sample_rate = 96000;
    tag.add_block(Block::StreamInfo(replacement.clone()));

    assert_eq!(tag.blocks()[0].kind(), BlockType::StreamInfo);
    assert_eq!(tag.streaminfo(), Some(&replacement));
}

#[test]
fn ape_title_replaced_twice_leaves_one_item() {
    let mut tag = ApeContainer::new();
    tag.set_item(ApeItem::text("Title", "first"));
    tag.set_item(ApeItem::text("Title", "second"));

    let titles: Vec<_> = tag.items().iter().filter(|i| i.key == "Title").collect();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].text_value(), Some("second"));
}

#[test]
fn numeric_pair_formatting() {
    use audiometa::fields::{parse_pair, render_pair};

    let opts = FormattingOptions::default();
    assert_eq!(render_pair(2, 3, &opts), "2/3");
    assert_eq!(render_pair(4, 0, &opts), "4");
    assert_eq!(parse_pair("4"), (4, 0));
    assert_eq!(parse_pair("2/3"), (2, 3));
}

#[test]
fn zero_padded_pairs_parse_back() {
    let opts = FormattingOptions { zero_pad: Some(2) };
    let mut tag = Id3Container::new(Id3Version::V24);
    tag.set_field_pair(FieldId::TrackNumber, 4, 12, &opts);

    assert_eq!(tag.get_field(FieldId::TrackNumber), Some("04/12"));
    assert_eq!(tag.get_field_pair(FieldId::TrackNumber), Some((4, 12)));
}
