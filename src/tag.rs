//! Embedding metadata in downloaded audio.
//!
//! MP3 streams get an ID3v2.4 tag in front of the audio. FLAC streams get
//! a Vorbis comment and a picture block after their stream info. Tags that
//! a stream already carries are replaced, the audio frames are kept as is.
//!
//! Metadata comes from three places: the gateway track data (credits,
//! copyright and lyrics), the catalog track (position, ISRC, BPM and gain)
//! and the catalog album (label, genres and cover art).

use crate::{
    error::{Error, Result},
    protocol::{api, media::Format},
    track::Track,
};

/// Metadata to embed in a track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tags {
    pub title: String,
    pub artist: String,
    pub artists: Vec<String>,
    pub album: String,
    pub album_artist: Option<String>,
    pub track_number: Option<u64>,
    pub track_total: Option<u64>,
    pub disc_number: Option<u64>,
    pub release_date: Option<String>,
    pub isrc: Option<String>,
    pub label: Option<String>,
    pub genres: Vec<String>,
    pub bpm: Option<f64>,
    pub copyright: Option<String>,
    pub composers: Vec<String>,
    pub lyricists: Vec<String>,
    pub lyrics: Option<String>,
    pub replay_gain: Option<String>,

    /// Front cover as JPEG
    pub cover: Option<Vec<u8>>,
}

const ID3_HEADER_LEN: usize = 10;
const ID3_FOOTER_LEN: usize = 10;
const ID3_VERSION: [u8; 2] = [4, 0];
const ID3_FOOTER_FLAG: u8 = 0x10;
const ID3_UTF8: u8 = 3;

const FLAC_MARKER: &[u8] = b"fLaC";
const FLAC_LAST_BLOCK: u8 = 0x80;
const FLAC_STREAMINFO: u8 = 0;
const FLAC_VORBIS_COMMENT: u8 = 4;
const FLAC_PICTURE: u8 = 6;
const FLAC_MAX_BLOCK_LEN: u32 = (1 << 24) - 1;

const COVER_MIME: &str = "image/jpeg";
const COVER_DESCRIPTION: &str = "Cover";
const FRONT_COVER: u8 = 3;
const VENDOR: &str = concat!("deezdl ", env!("CARGO_PKG_VERSION"));

impl Tags {
    /// Collects the metadata of `track`, completed from its catalog entry
    /// and album when given.
    #[must_use]
    pub fn new(track: &Track, details: Option<&api::Track>, album: Option<&api::Album>) -> Self {
        let contributors = track.contributors();
        let mut tags = Self {
            title: track.title().to_owned(),
            artist: track.artist().to_owned(),
            album: track.album().to_owned(),
            copyright: Some(track.copyright().to_owned()).filter(|s| !s.is_empty()),
            composers: contributors.composer.clone(),
            lyricists: contributors.author.clone(),
            lyrics: track.lyrics().map(|lyrics| lyrics.text.clone()),
            ..Self::default()
        };

        if let Some(details) = details {
            tags.artists = details
                .contributors
                .iter()
                .map(|artist| artist.name.clone())
                .collect();
            tags.track_number = details.track_position;
            tags.disc_number = details.disk_number;
            tags.release_date.clone_from(&details.release_date);
            tags.isrc.clone_from(&details.isrc);
            tags.bpm = details.bpm.filter(|bpm| *bpm > 0.0);
            tags.replay_gain = details.replay_gain();
        }

        if let Some(album) = album {
            tags.album.clone_from(&album.title);
            tags.album_artist = Some(album.artist.name.clone());
            tags.track_total = Some(album.nb_tracks).filter(|total| *total > 0);
            tags.label.clone_from(&album.label);
            tags.genres = album.genre_names();
            if tags.release_date.is_none() {
                tags.release_date.clone_from(&album.release_date);
            }
        }

        tags
    }

    #[must_use]
    pub fn with_cover(mut self, cover: Vec<u8>) -> Self {
        self.cover = Some(cover);
        self
    }

    /// Embeds the tags in `audio` that was downloaded in `format`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` if a FLAC download does not look like FLAC
    /// * `DataLoss` if its metadata blocks are truncated
    /// * `OutOfRange` if a tag value is too large for the container
    /// * `Unimplemented` for formats that cannot carry tags
    pub fn apply(&self, format: Format, audio: &[u8]) -> Result<Vec<u8>> {
        match format {
            Format::FLAC => self.flac(audio),
            Format::MP3_64
            | Format::MP3_128
            | Format::MP3_256
            | Format::MP3_320
            | Format::MP3_MISC => self.id3(audio),
            Format::EXTERNAL => Err(Error::unimplemented(format!(
                "cannot tag {format} streams"
            ))),
        }
    }

    fn track_position(&self) -> String {
        match (self.track_number, self.track_total) {
            (Some(number), Some(total)) => format!("{number}/{total}"),
            (Some(number), None) => number.to_string(),
            (None, _) => String::new(),
        }
    }

    fn id3(&self, audio: &[u8]) -> Result<Vec<u8>> {
        let mut frames = Vec::new();
        let text = |frames: &mut Vec<u8>, id: &[u8; 4], value: &str| {
            if value.is_empty() {
                return Ok(());
            }
            let mut body = vec![ID3_UTF8];
            body.extend_from_slice(value.as_bytes());
            id3_frame(frames, id, &body)
        };

        // Multiple values of a text frame are separated by NUL.
        text(&mut frames, b"TIT2", &self.title)?;
        text(&mut frames, b"TPE1", &self.artist)?;
        text(&mut frames, b"TALB", &self.album)?;
        text(&mut frames, b"TPE2", opt(self.album_artist.as_ref()))?;
        text(&mut frames, b"TRCK", &self.track_position())?;
        text(
            &mut frames,
            b"TPOS",
            &self.disc_number.map(|n| n.to_string()).unwrap_or_default(),
        )?;
        text(&mut frames, b"TDRC", opt(self.release_date.as_ref()))?;
        text(&mut frames, b"TSRC", opt(self.isrc.as_ref()))?;
        text(&mut frames, b"TPUB", opt(self.label.as_ref()))?;
        text(&mut frames, b"TCON", &self.genres.join("\0"))?;
        text(
            &mut frames,
            b"TBPM",
            &self.bpm.map(|bpm| format!("{bpm:.0}")).unwrap_or_default(),
        )?;
        text(&mut frames, b"TCOP", opt(self.copyright.as_ref()))?;
        text(&mut frames, b"TCOM", &self.composers.join("\0"))?;
        text(&mut frames, b"TEXT", &self.lyricists.join("\0"))?;

        if let Some(gain) = &self.replay_gain {
            let mut body = vec![ID3_UTF8];
            body.extend_from_slice(b"replaygain_track_gain\0");
            body.extend_from_slice(gain.as_bytes());
            id3_frame(&mut frames, b"TXXX", &body)?;
        }

        if let Some(lyrics) = self.lyrics.as_ref().filter(|lyrics| !lyrics.is_empty()) {
            // Language, then an empty content descriptor.
            let mut body = vec![ID3_UTF8];
            body.extend_from_slice(b"eng\0");
            body.extend_from_slice(lyrics.as_bytes());
            id3_frame(&mut frames, b"USLT", &body)?;
        }

        if let Some(cover) = &self.cover {
            let mut body = vec![ID3_UTF8];
            body.extend_from_slice(COVER_MIME.as_bytes());
            body.push(0);
            body.push(FRONT_COVER);
            body.extend_from_slice(COVER_DESCRIPTION.as_bytes());
            body.push(0);
            body.extend_from_slice(cover);
            id3_frame(&mut frames, b"APIC", &body)?;
        }

        let audio = strip_id3(audio);
        let mut tagged = Vec::with_capacity(ID3_HEADER_LEN + frames.len() + audio.len());
        tagged.extend_from_slice(b"ID3");
        tagged.extend_from_slice(&ID3_VERSION);
        tagged.push(0);
        tagged.extend_from_slice(&syncsafe(frames.len())?);
        tagged.extend_from_slice(&frames);
        tagged.extend_from_slice(audio);

        Ok(tagged)
    }

    fn vorbis_comment(&self) -> Result<Vec<u8>> {
        let mut comments = Vec::new();
        let mut add = |key: &str, value: &str| {
            if !value.is_empty() {
                comments.push(format!("{key}={value}"));
            }
        };

        add("TITLE", &self.title);
        add("ARTIST", &self.artist);
        for artist in self.artists.iter().filter(|artist| **artist != self.artist) {
            add("ARTIST", artist);
        }
        add("ALBUM", &self.album);
        add("ALBUMARTIST", opt(self.album_artist.as_ref()));
        add(
            "TRACKNUMBER",
            &self.track_number.map(|n| n.to_string()).unwrap_or_default(),
        );
        add(
            "TRACKTOTAL",
            &self.track_total.map(|n| n.to_string()).unwrap_or_default(),
        );
        add(
            "DISCNUMBER",
            &self.disc_number.map(|n| n.to_string()).unwrap_or_default(),
        );
        add("DATE", opt(self.release_date.as_ref()));
        add("ISRC", opt(self.isrc.as_ref()));
        add("ORGANIZATION", opt(self.label.as_ref()));
        for genre in &self.genres {
            add("GENRE", genre);
        }
        add(
            "BPM",
            &self.bpm.map(|bpm| format!("{bpm:.0}")).unwrap_or_default(),
        );
        add("COPYRIGHT", opt(self.copyright.as_ref()));
        for composer in &self.composers {
            add("COMPOSER", composer);
        }
        for lyricist in &self.lyricists {
            add("LYRICIST", lyricist);
        }
        add("LYRICS", opt(self.lyrics.as_ref()));
        add("REPLAYGAIN_TRACK_GAIN", opt(self.replay_gain.as_ref()));

        // Vorbis comments are little endian, unlike the FLAC container.
        let mut body = Vec::new();
        body.extend_from_slice(&len_u32(VENDOR.len())?.to_le_bytes());
        body.extend_from_slice(VENDOR.as_bytes());
        body.extend_from_slice(&len_u32(comments.len())?.to_le_bytes());
        for comment in &comments {
            body.extend_from_slice(&len_u32(comment.len())?.to_le_bytes());
            body.extend_from_slice(comment.as_bytes());
        }

        Ok(body)
    }

    fn flac(&self, audio: &[u8]) -> Result<Vec<u8>> {
        let comment = self.vorbis_comment()?;
        let picture = self.cover.as_deref().map(flac_picture).transpose()?;

        let (blocks, frames) = flac_blocks(audio)?;
        let mut blocks: Vec<(u8, &[u8])> = blocks
            .into_iter()
            .filter(|(typ, _)| *typ != FLAC_VORBIS_COMMENT && *typ != FLAC_PICTURE)
            .collect();
        if blocks.first().map(|(typ, _)| *typ) != Some(FLAC_STREAMINFO) {
            return Err(Error::invalid_argument(
                "flac stream does not start with stream info",
            ));
        }

        blocks.insert(1, (FLAC_VORBIS_COMMENT, comment.as_slice()));
        if let Some(picture) = &picture {
            blocks.insert(2, (FLAC_PICTURE, picture.as_slice()));
        }

        let mut tagged = Vec::with_capacity(audio.len() + comment.len());
        tagged.extend_from_slice(FLAC_MARKER);
        let count = blocks.len();
        for (i, (typ, body)) in blocks.into_iter().enumerate() {
            let len = len_u32(body.len())?;
            if len > FLAC_MAX_BLOCK_LEN {
                return Err(Error::out_of_range(format!(
                    "{len} bytes do not fit in a flac metadata block"
                )));
            }

            let last = if i + 1 == count { FLAC_LAST_BLOCK } else { 0 };
            tagged.push(last | typ);
            tagged.extend_from_slice(&len.to_be_bytes()[1..]);
            tagged.extend_from_slice(body);
        }
        tagged.extend_from_slice(frames);

        Ok(tagged)
    }
}

fn opt(value: Option<&String>) -> &str {
    value.map_or("", String::as_str)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::out_of_range(format!("{len} bytes exceed a tag field")))
}

fn id3_frame(frames: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) -> Result<()> {
    frames.extend_from_slice(id);
    frames.extend_from_slice(&syncsafe(body.len())?);
    frames.extend_from_slice(&[0, 0]);
    frames.extend_from_slice(body);
    Ok(())
}

/// Encodes `len` in four bytes of seven bits each.
#[allow(clippy::cast_possible_truncation)]
fn syncsafe(len: usize) -> Result<[u8; 4]> {
    let len = len_u32(len)?;
    if len >= 1 << 28 {
        return Err(Error::out_of_range(format!(
            "{len} bytes do not fit in an id3 tag"
        )));
    }

    Ok([
        (len >> 21) as u8 & 0x7f,
        (len >> 14) as u8 & 0x7f,
        (len >> 7) as u8 & 0x7f,
        len as u8 & 0x7f,
    ])
}

fn unsyncsafe(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .fold(0, |len, byte| (len << 7) | usize::from(byte & 0x7f))
}

/// The audio after any ID3v2 tag at its start.
fn strip_id3(audio: &[u8]) -> &[u8] {
    if audio.len() < ID3_HEADER_LEN || !audio.starts_with(b"ID3") {
        return audio;
    }

    let footer = if audio[5] & ID3_FOOTER_FLAG == 0 {
        0
    } else {
        ID3_FOOTER_LEN
    };
    let end = ID3_HEADER_LEN + unsyncsafe(&audio[6..10]) + footer;
    audio.get(end..).unwrap_or(audio)
}

/// Splits a FLAC stream into its metadata blocks and the audio frames.
fn flac_blocks(audio: &[u8]) -> Result<(Vec<(u8, &[u8])>, &[u8])> {
    let mut rest = audio
        .strip_prefix(FLAC_MARKER)
        .ok_or_else(|| Error::invalid_argument("not a flac stream"))?;

    let mut blocks = Vec::new();
    loop {
        let &[header, a, b, c, ..] = rest else {
            return Err(Error::data_loss("flac metadata ends early"));
        };
        let len = (usize::from(a) << 16) | (usize::from(b) << 8) | usize::from(c);
        let body = rest
            .get(4..4 + len)
            .ok_or_else(|| Error::data_loss("flac metadata block ends early"))?;

        blocks.push((header & !FLAC_LAST_BLOCK, body));
        rest = &rest[4 + len..];

        if header & FLAC_LAST_BLOCK != 0 {
            return Ok((blocks, rest));
        }
    }
}

fn flac_picture(cover: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(&u32::from(FRONT_COVER).to_be_bytes());
    body.extend_from_slice(&len_u32(COVER_MIME.len())?.to_be_bytes());
    body.extend_from_slice(COVER_MIME.as_bytes());
    body.extend_from_slice(&len_u32(COVER_DESCRIPTION.len())?.to_be_bytes());
    body.extend_from_slice(COVER_DESCRIPTION.as_bytes());
    // Width, height, color depth and palette size are left unknown.
    body.extend_from_slice(&[0; 16]);
    body.extend_from_slice(&len_u32(cover.len())?.to_be_bytes());
    body.extend_from_slice(cover);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{error::ErrorKind, protocol::gateway::PageTrack};

    const MP3_FRAMES: &[u8] = b"\xFF\xFB\x90\x64mp3 frames";
    const FLAC_FRAMES: &[u8] = b"\xFF\xF8\x69\x18flac frames";
    const COVER: &[u8] = b"\xFF\xD8\xFF\xE0jpeg";

    fn tags() -> Tags {
        Tags {
            title: "Harder, Better, Faster, Stronger".to_owned(),
            artist: "Daft Punk".to_owned(),
            album: "Discovery".to_owned(),
            track_number: Some(4),
            track_total: Some(14),
            genres: vec!["Dance".to_owned(), "Electro".to_owned()],
            composers: vec!["Thomas Bangalter".to_owned()],
            lyrics: Some("Work it harder".to_owned()),
            replay_gain: Some("-9.80 dB".to_owned()),
            ..Tags::default()
        }
        .with_cover(COVER.to_vec())
    }

    /// Frame bodies of an ID3v2.4 tag by frame ID.
    fn id3_frames(tagged: &[u8]) -> (HashMap<String, Vec<u8>>, &[u8]) {
        assert_eq!(&tagged[..6], b"ID3\x04\x00\x00");
        let size = unsyncsafe(&tagged[6..10]);
        let mut frames = &tagged[ID3_HEADER_LEN..ID3_HEADER_LEN + size];

        let mut bodies = HashMap::new();
        while !frames.is_empty() {
            let id = String::from_utf8(frames[..4].to_vec()).unwrap();
            let len = unsyncsafe(&frames[4..8]);
            bodies.insert(id, frames[10..10 + len].to_vec());
            frames = &frames[10 + len..];
        }

        (bodies, &tagged[ID3_HEADER_LEN + size..])
    }

    fn flac_stream(blocks: &[(u8, &[u8])]) -> Vec<u8> {
        let mut stream = FLAC_MARKER.to_vec();
        for (i, (typ, body)) in blocks.iter().enumerate() {
            let last = if i + 1 == blocks.len() { FLAC_LAST_BLOCK } else { 0 };
            stream.push(last | typ);
            stream.extend_from_slice(&u32::try_from(body.len()).unwrap().to_be_bytes()[1..]);
            stream.extend_from_slice(body);
        }
        stream.extend_from_slice(FLAC_FRAMES);
        stream
    }

    #[test]
    fn encodes_syncsafe_sizes() {
        assert_eq!(syncsafe(200).unwrap(), [0, 0, 1, 0x48]);
        assert_eq!(syncsafe(0x0FFF_FFFF).unwrap(), [0x7f; 4]);
        assert_eq!(unsyncsafe(&[0, 0, 1, 0x48]), 200);
        assert_eq!(syncsafe(1 << 28).unwrap_err().kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn mp3_gets_id3_tag_in_front_of_the_audio() {
        let tagged = tags().apply(Format::MP3_320, MP3_FRAMES).unwrap();
        let (frames, audio) = id3_frames(&tagged);

        assert_eq!(audio, MP3_FRAMES);
        assert_eq!(frames["TIT2"], b"\x03Harder, Better, Faster, Stronger");
        assert_eq!(frames["TRCK"], b"\x034/14");
        assert_eq!(frames["TCON"], b"\x03Dance\0Electro");
        assert_eq!(frames["TXXX"], b"\x03replaygain_track_gain\0-9.80 dB");
        assert!(frames["USLT"].starts_with(b"\x03eng\0Work"));
        assert!(frames["APIC"].starts_with(b"\x03image/jpeg\0\x03Cover\0"));
        assert!(frames["APIC"].ends_with(COVER));
        assert!(!frames.contains_key("TSRC"));
    }

    #[test]
    fn existing_id3_tag_is_replaced() {
        let mut audio = b"ID3\x04\x00\x00\x00\x00\x00\x05stale".to_vec();
        audio.extend_from_slice(MP3_FRAMES);

        let tagged = tags().apply(Format::MP3_128, &audio).unwrap();
        let (_, rest) = id3_frames(&tagged);
        assert_eq!(rest, MP3_FRAMES);
    }

    #[test]
    fn flac_gets_comment_and_picture_after_stream_info() {
        let stream_info = [0x11; 34];
        let stream = flac_stream(&[
            (FLAC_STREAMINFO, stream_info.as_slice()),
            (FLAC_VORBIS_COMMENT, b"stale".as_slice()),
            (1, [0; 8].as_slice()),
        ]);

        let tagged = tags().apply(Format::FLAC, &stream).unwrap();
        let (blocks, frames) = flac_blocks(&tagged).unwrap();

        assert_eq!(frames, FLAC_FRAMES);
        assert_eq!(
            blocks.iter().map(|(typ, _)| *typ).collect::<Vec<_>>(),
            [FLAC_STREAMINFO, FLAC_VORBIS_COMMENT, FLAC_PICTURE, 1]
        );
        assert_eq!(blocks[0].1, stream_info);

        let comment = String::from_utf8_lossy(blocks[1].1);
        assert!(comment.contains("deezdl"));
        for expected in [
            "TITLE=Harder, Better, Faster, Stronger",
            "TRACKNUMBER=4",
            "TRACKTOTAL=14",
            "GENRE=Dance",
            "GENRE=Electro",
            "COMPOSER=Thomas Bangalter",
            "REPLAYGAIN_TRACK_GAIN=-9.80 dB",
        ] {
            assert!(comment.contains(expected), "{expected}");
        }
        assert!(!comment.contains("stale"));
        assert!(blocks[2].1.ends_with(COVER));
    }

    #[test]
    fn refuses_streams_that_are_not_flac() {
        let err = tags().apply(Format::FLAC, MP3_FRAMES).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let err = tags().apply(Format::FLAC, b"fLaC\x00\x00\x00\x22short").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
    }

    #[test]
    fn collects_metadata_from_all_sources() {
        let page: PageTrack = serde_json::from_str(
            r#"{
                "DATA": {
                    "SNG_ID": "3135556",
                    "SNG_TITLE": "Harder, Better, Faster, Stronger",
                    "ART_NAME": "Daft Punk",
                    "ALB_TITLE": "Discovery",
                    "COPYRIGHT": "(P) 2001 Daft Life Ltd.",
                    "SNG_CONTRIBUTORS": {"composer": ["Thomas Bangalter"]},
                    "TRACK_TOKEN": "token",
                    "TRACK_TOKEN_EXPIRE": 1700000000
                },
                "LYRICS": {"LYRICS_TEXT": "Work it harder"}
            }"#,
        )
        .unwrap();
        let track = Track::from(page);

        let details: api::Track = serde_json::from_str(
            r#"{"id": 3135556, "title": "Harder, Better, Faster, Stronger", "duration": 224,
                "isrc": "GBDUW0000059", "track_position": 4, "disk_number": 1,
                "release_date": "2001-03-07", "bpm": 123.6, "gain": -8.6,
                "artist": {"id": 27, "name": "Daft Punk"}}"#,
        )
        .unwrap();
        let album: api::Album = serde_json::from_str(
            r#"{"id": 302127, "title": "Discovery", "label": "Parlophone", "nb_tracks": 14,
                "artist": {"id": 27, "name": "Daft Punk"},
                "genres": {"data": [{"id": 113, "name": "Dance"}]},
                "tracks": {"data": []}}"#,
        )
        .unwrap();

        let tags = Tags::new(&track, Some(&details), Some(&album));
        assert_eq!(tags.copyright.as_deref(), Some("(P) 2001 Daft Life Ltd."));
        assert_eq!(tags.composers, ["Thomas Bangalter"]);
        assert_eq!(tags.lyrics.as_deref(), Some("Work it harder"));
        assert_eq!(tags.track_position(), "4/14");
        assert_eq!(tags.isrc.as_deref(), Some("GBDUW0000059"));
        assert_eq!(tags.label.as_deref(), Some("Parlophone"));
        assert_eq!(tags.genres, ["Dance"]);
        assert_eq!(tags.replay_gain.as_deref(), Some("-9.80 dB"));
        assert_eq!(tags.album_artist.as_deref(), Some("Daft Punk"));

        let bare = Tags::new(&track, None, None);
        assert_eq!(bare.album, "Discovery");
        assert_eq!(bare.track_position(), "");
        assert!(bare.cover.is_none());
    }

    #[test]
    fn external_streams_cannot_be_tagged() {
        let err = tags().apply(Format::EXTERNAL, MP3_FRAMES).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);
    }
}
