use mediatag::flac::{block_type, BlockHeader, FlacStream};
use mediatag::vorbis::{VorbisComment, VorbisCommentFlags, VorbisField};
use mediatag::{Diagnostics, KnownField, Picture, Tag, TagValue};
use std::io::Cursor;

fn stream_info_data() -> [u8; 34] {
    let mut raw = [0u8; 34];
    raw[0..2].copy_from_slice(&4096u16.to_be_bytes());
    raw[2..4].copy_from_slice(&4096u16.to_be_bytes());
    let packed: u64 = (44_100u64 << 44) | ((2u64 - 1) << 41) | ((16u64 - 1) << 36) | 441_000;
    raw[10..18].copy_from_slice(&packed.to_be_bytes());
    raw
}

fn sample_comment_data() -> Vec<u8> {
    let mut comment = VorbisComment::new();
    comment.set_vendor(TagValue::text("reference libFLAC"));
    comment
        .fields_mut()
        .insert(VorbisField::new("TITLE", TagValue::text("Hello")));
    comment
        .fields_mut()
        .insert(VorbisField::new("ARTIST", TagValue::text("World")));
    let mut raw = Vec::new();
    comment
        .make(
            &mut raw,
            VorbisCommentFlags::NO_SIGNATURE | VorbisCommentFlags::NO_FRAMING_BYTE,
            &mut Diagnostics::new(),
        )
        .unwrap();
    raw
}

/// `STREAMINFO | VORBIS_COMMENT | PADDING(last)` followed by fake audio frames.
fn sample_file() -> (Vec<u8>, usize) {
    let comment_data = sample_comment_data();
    let mut raw = b"fLaC".to_vec();
    BlockHeader {
        is_last: false,
        block_type: block_type::STREAM_INFO,
        data_size: 34,
    }
    .encode(&mut raw)
    .unwrap();
    raw.extend_from_slice(&stream_info_data());
    BlockHeader {
        is_last: false,
        block_type: block_type::VORBIS_COMMENT,
        data_size: comment_data.len() as u32,
    }
    .encode(&mut raw)
    .unwrap();
    raw.extend_from_slice(&comment_data);
    BlockHeader {
        is_last: true,
        block_type: block_type::PADDING,
        data_size: 1024,
    }
    .encode(&mut raw)
    .unwrap();
    raw.extend_from_slice(&[0; 1024]);
    raw.extend_from_slice(b"\xFF\xF8fake-audio-frames");
    (raw, comment_data.len())
}

#[test]
fn parse_reads_tag_and_layout_facts() {
    let (raw, comment_size) = sample_file();
    let mut diag = Diagnostics::new();
    let stream = FlacStream::parse(Cursor::new(&raw), 0, &mut diag).unwrap();
    assert!(diag.is_empty(), "{:?}", diag);

    let comment = stream.comment().unwrap();
    assert_eq!("Hello", comment.value(KnownField::Title).to_text().unwrap());
    assert_eq!("World", comment.value(KnownField::Artist).to_text().unwrap());
    assert_eq!("reference libFLAC", comment.vendor().to_text().unwrap());

    assert_eq!(44_100, stream.info().sample_rate);
    assert_eq!(2, stream.info().channel_count);
    assert_eq!(16, stream.info().bits_per_sample);
    assert_eq!(441_000, stream.info().total_samples);

    let expected_offset = 4 + 38 + (4 + comment_size as u64) + 1028;
    assert_eq!(expected_offset, stream.stream_offset());
    assert_eq!(1028, stream.padding_size());
}

#[test]
fn rewrite_with_cover_splits_picture_block() {
    let (raw, _) = sample_file();
    let mut stream = FlacStream::parse(Cursor::new(&raw), 0, &mut Diagnostics::new()).unwrap();

    let cover = Picture {
        mime_type: "image/jpeg".to_string(),
        description: String::new(),
        data: vec![0xD8; 10_000],
    };
    stream
        .comment_mut()
        .unwrap()
        .set_value(KnownField::Cover, TagValue::Picture(cover.clone()));

    let mut out = Cursor::new(Vec::new());
    let last_offset = stream
        .make_header(Cursor::new(&raw), &mut out, &mut Diagnostics::new())
        .unwrap();
    let rewritten = out.into_inner();

    // Walk the block chain: STREAMINFO, VORBIS_COMMENT, PICTURE(last). No padding survives.
    assert_eq!(b"fLaC", &rewritten[0..4]);
    let mut cursor = Cursor::new(&rewritten[4..]);
    let mut chain = Vec::new();
    loop {
        let header = BlockHeader::decode(&mut cursor).unwrap();
        chain.push((header.block_type, header.is_last, header.data_size));
        let position = cursor.position();
        cursor.set_position(position + u64::from(header.data_size));
        if header.is_last {
            break;
        }
    }
    assert_eq!(3, chain.len());
    assert_eq!((block_type::STREAM_INFO, false, 34), chain[0]);
    assert_eq!(block_type::VORBIS_COMMENT, chain[1].0);
    assert!(!chain[1].1);
    assert_eq!(block_type::PICTURE, chain[2].0);
    assert!(chain[2].1);
    // 32 bytes of fixed picture block fields plus the MIME type and the image itself.
    assert_eq!(32 + 10 + 10_000, chain[2].2);

    // The returned offset points at the PICTURE block header.
    let picture_header = BlockHeader::decode(Cursor::new(&rewritten[last_offset as usize..]))
        .unwrap();
    assert_eq!(block_type::PICTURE, picture_header.block_type);

    // Parsing the rewritten header yields the same tag, now with the cover folded back in.
    let reparsed =
        FlacStream::parse(Cursor::new(&rewritten), 0, &mut Diagnostics::new()).unwrap();
    assert_eq!(0, reparsed.padding_size());
    let comment = reparsed.comment().unwrap();
    assert_eq!("Hello", comment.value(KnownField::Title).to_text().unwrap());
    assert_eq!(Some(&cover), comment.value(KnownField::Cover).picture());

    // The comment block itself must not carry the picture inline.
    let comment_start = 4 + 4 + 34 + 4;
    let comment_end = comment_start + chain[1].2 as usize;
    let inline = b"METADATA_BLOCK_PICTURE";
    assert!(!rewritten[comment_start..comment_end]
        .windows(inline.len())
        .any(|w| w == &inline[..]));
}

#[test]
fn rewrite_without_comment_keeps_other_blocks() {
    let (raw, _) = sample_file();
    let mut stream = FlacStream::parse(Cursor::new(&raw), 0, &mut Diagnostics::new()).unwrap();
    stream.remove_comment();

    let mut out = Cursor::new(Vec::new());
    stream
        .make_header(Cursor::new(&raw), &mut out, &mut Diagnostics::new())
        .unwrap();
    // The caller terminates the chain with padding.
    FlacStream::make_padding(&mut out, 64, true).unwrap();
    let rewritten = out.into_inner();

    let reparsed =
        FlacStream::parse(Cursor::new(&rewritten), 0, &mut Diagnostics::new()).unwrap();
    assert!(reparsed.comment().is_none());
    assert_eq!(64, reparsed.padding_size());
    assert_eq!(44_100, reparsed.info().sample_rate);
}

#[test]
fn bad_signature_is_fatal() {
    let mut diag = Diagnostics::new();
    let err = FlacStream::parse(Cursor::new(b"OggS....".to_vec()), 0, &mut diag).unwrap_err();
    assert!(matches!(err.kind, mediatag::ErrorKind::InvalidData));
    assert!(!diag.is_empty());
}
