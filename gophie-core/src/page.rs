use std::fmt;
use std::io;
use std::path::Path;

use base64::Engine;
use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;
use tracing::warn;

use crate::address::Address;
use crate::error::MenuLineError;
use crate::item::{ItemType, MenuItem};
use crate::settings::{SettingsStore, SECTION_NETWORK};
use crate::sink::FileSink;

pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Line that ends a menu response, with its surrounding line breaks.
const TERMINATOR: &str = "\r\n.\r\n";

/// How many leading bytes are inspected when sniffing for binary content.
const SNIFF_LEN: usize = 4096;

/// Character set used to turn page bytes into text.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    pub fn from_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.trim().as_bytes()).map(Charset)
    }

    /// Reads `DEFAULT_CHARSET` from the `Network` section, falling back to
    /// UTF-8 when the label is unknown.
    pub fn from_settings(settings: &dyn SettingsStore) -> Self {
        let label = settings.setting("DEFAULT_CHARSET", SECTION_NETWORK, DEFAULT_CHARSET);
        Self::from_label(&label).unwrap_or_else(|| {
            warn!(charset = %label, "Unknown charset, using {}", DEFAULT_CHARSET);
            Charset::default()
        })
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    fn decode_lossy(&self, bytes: &[u8]) -> String {
        self.0.decode_without_bom_handling(bytes).0.into_owned()
    }

    fn decode_strict(&self, bytes: &[u8]) -> Option<String> {
        self.0
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset(UTF_8)
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Charset").field(&self.name()).finish()
    }
}

#[derive(Error, Debug)]
enum MenuDecodeError {
    #[error("Bytes are not valid {0}")]
    Charset(&'static str),
    #[error(transparent)]
    Line(#[from] MenuLineError),
}

/// The result of one fetch: raw bytes plus, for menus, the decoded items.
#[derive(Debug, Clone)]
pub struct Page {
    bytes: Vec<u8>,
    address: Address,
    content_type: ItemType,
    items: Vec<MenuItem>,
    charset: Charset,
}

impl Page {
    pub fn new(bytes: Vec<u8>, requested: ItemType, address: Address) -> Self {
        Self::with_charset(bytes, requested, address, Charset::default())
    }

    /// Builds a page. Menu and unknown content is decoded as a menu; if any
    /// line fails to decode, the whole page becomes a text file with no
    /// items. Every other type is stored as-is.
    pub fn with_charset(
        bytes: Vec<u8>,
        requested: ItemType,
        address: Address,
        charset: Charset,
    ) -> Self {
        let mut page = Page {
            bytes,
            address,
            content_type: requested,
            items: Vec::new(),
            charset,
        };

        if matches!(requested, ItemType::Menu | ItemType::Unknown) {
            match page.decode_menu() {
                Ok(items) => {
                    page.items = items;
                    page.content_type = ItemType::Menu;
                }
                Err(e) => {
                    warn!(address = %page.address, error = %e, "Failed to parse gopher menu, treating as text");
                    page.content_type = ItemType::TextFile;
                }
            }
        }
        page
    }

    fn decode_menu(&self) -> Result<Vec<MenuItem>, MenuDecodeError> {
        let text = self
            .charset
            .decode_strict(&self.bytes)
            .ok_or(MenuDecodeError::Charset(self.charset.name()))?;

        text.split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty() && *line != ".")
            .map(|line| MenuItem::parse(line).map_err(MenuDecodeError::Line))
            .collect()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn content_type(&self) -> ItemType {
        self.content_type
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// The bytes decoded with the page charset, unknown sequences replaced.
    pub fn source_code(&self) -> String {
        self.charset.decode_lossy(&self.bytes)
    }

    /// Display strings for menus, one per line; otherwise the decoded text
    /// without the menu terminator.
    pub fn text_content(&self) -> String {
        if self.items.is_empty() {
            return self.source_code().replace(TERMINATOR, "");
        }

        self.items.iter().fold(String::new(), |mut text, item| {
            text.push_str(&item.display);
            text.push('\n');
            text
        })
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// File name for saving this page: the last path segment of its address
    /// (or `index`), with the content type's default extension when the name
    /// has none.
    pub fn file_name(&self) -> String {
        let url = self.address.url_string(false);
        let mut name = match url.rfind('/') {
            Some(pos) if pos > 0 && pos + 1 < url.len() => url[pos + 1..].to_string(),
            _ => "index".to_string(),
        };
        if !name.contains('.') {
            name.push('.');
            name.push_str(self.content_type.default_extension());
        }
        name
    }

    pub async fn save_as(&self, path: &Path, sink: &dyn FileSink) -> io::Result<()> {
        sink.write(path, &self.bytes).await
    }
}

/// Looks at the first bytes of a response and names the binary type they
/// belong to, if any. Text-looking content yields `None`.
pub fn detect_binary_type(bytes: &[u8]) -> Option<ItemType> {
    const IMAGE_MAGIC: &[&[u8]] = &[
        b"\x89PNG\r\n\x1a\n",
        b"\xff\xd8\xff",
        b"BM",
        b"II*\0",
        b"MM\0*",
    ];
    const SOUND_MAGIC: &[&[u8]] = &[b"ID3", b"OggS", b"fLaC"];

    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(ItemType::Gif);
    }
    if IMAGE_MAGIC.iter().any(|magic| bytes.starts_with(magic)) {
        return Some(ItemType::Image);
    }
    if SOUND_MAGIC.iter().any(|magic| bytes.starts_with(magic))
        || (bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WAVE".as_slice()))
    {
        return Some(ItemType::Sound);
    }

    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    head.contains(&0).then_some(ItemType::Binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;

    fn address() -> Address {
        Address::parse("gopher.example/docs").unwrap()
    }

    const MENU: &[u8] = b"iWelcome\t\terror.host\t1\r\n\
        1Docs\t/docs\tgopher.example\t70\r\n\
        0Readme\t/readme.txt\tgopher.example\t70\r\n\
        \r\n\
        .\r\n";

    #[test]
    fn decodes_menus() {
        let page = Page::new(MENU.to_vec(), ItemType::Menu, address());
        assert_eq!(page.content_type(), ItemType::Menu);
        assert_eq!(page.items().len(), 3);
        assert_eq!(page.items()[1].selector, "/docs");
        assert_eq!(page.text_content(), "Welcome\nDocs\nReadme\n");
    }

    #[test]
    fn unknown_content_is_tried_as_menu() {
        let page = Page::new(MENU.to_vec(), ItemType::Unknown, address());
        assert_eq!(page.content_type(), ItemType::Menu);
        assert_eq!(page.items().len(), 3);
    }

    #[test]
    fn undecodable_bytes_fall_back_to_text() {
        let bytes = vec![0x89, 0x00, 0xff, 0xfe, b'\n', 0x01, 0x02];
        let page = Page::new(bytes.clone(), ItemType::Unknown, address());
        assert_eq!(page.content_type(), ItemType::TextFile);
        assert!(page.items().is_empty());
        assert_eq!(page.bytes(), bytes.as_slice());
    }

    #[test]
    fn one_bad_line_fails_the_whole_page() {
        let bytes = b"1Docs\t/docs\thost\t70\r\n0bad\x01line\t/x\thost\t70\r\n".to_vec();
        let page = Page::new(bytes, ItemType::Menu, address());
        assert_eq!(page.content_type(), ItemType::TextFile);
        assert!(page.items().is_empty());
    }

    #[test]
    fn other_types_are_stored_verbatim() {
        let page = Page::new(MENU.to_vec(), ItemType::TextFile, address());
        assert_eq!(page.content_type(), ItemType::TextFile);
        assert!(page.items().is_empty());

        let page = Page::new(vec![0, 1, 2], ItemType::Binary, address());
        assert_eq!(page.content_type(), ItemType::Binary);
        assert_eq!(page.len(), 3);
    }

    #[test]
    fn text_content_strips_terminator() {
        let page = Page::new(
            b"Hello\r\nworld\r\n.\r\n".to_vec(),
            ItemType::TextFile,
            address(),
        );
        assert_eq!(page.text_content(), "Hello\r\nworld");
        assert_eq!(page.source_code(), "Hello\r\nworld\r\n.\r\n");
    }

    #[test]
    fn empty_menu_is_still_a_menu() {
        let page = Page::new(b".\r\n".to_vec(), ItemType::Menu, address());
        assert_eq!(page.content_type(), ItemType::Menu);
        assert!(page.items().is_empty());
        assert_eq!(page.text_content(), ".\r\n");
    }

    #[test]
    fn charset_comes_from_settings() {
        let settings = MemorySettings::new().with("DEFAULT_CHARSET", "ISO-8859-1", SECTION_NETWORK);
        let charset = Charset::from_settings(&settings);
        assert_eq!(charset.name(), "windows-1252");

        let page = Page::with_charset(b"caf\xe9".to_vec(), ItemType::TextFile, address(), charset);
        assert_eq!(page.text_content(), "café");

        let utf8 = Page::new(b"caf\xe9".to_vec(), ItemType::Unknown, address());
        assert_eq!(utf8.content_type(), ItemType::TextFile);
        assert_eq!(utf8.text_content(), "caf\u{fffd}");
    }

    #[test]
    fn unknown_charset_label_uses_utf8() {
        let settings = MemorySettings::new().with("DEFAULT_CHARSET", "klingon", SECTION_NETWORK);
        assert_eq!(Charset::from_settings(&settings), Charset::default());
    }

    #[test]
    fn file_names() {
        let page = Page::new(b"x".to_vec(), ItemType::TextFile, address());
        assert_eq!(page.file_name(), "docs.txt");

        let root = Page::new(b"1a\t\th\t70".to_vec(), ItemType::Menu, Address::parse("host").unwrap());
        assert_eq!(root.file_name(), "index.gophermap");

        let gif = Page::new(vec![1], ItemType::Gif, Address::parse("host/0/pics/cat.gif").unwrap());
        assert_eq!(gif.file_name(), "cat.gif");
    }

    #[test]
    fn base64_of_raw_bytes() {
        let page = Page::new(b"hi!".to_vec(), ItemType::Image, address());
        assert_eq!(page.base64(), "aGkh");
    }

    #[test]
    fn sniffs_binary_content() {
        assert_eq!(detect_binary_type(b"GIF89a\x01\x00"), Some(ItemType::Gif));
        assert_eq!(detect_binary_type(b"\x89PNG\r\n\x1a\n...."), Some(ItemType::Image));
        assert_eq!(detect_binary_type(b"\xff\xd8\xff\xe0"), Some(ItemType::Image));
        assert_eq!(detect_binary_type(b"RIFF\x24\x00\x00\x00WAVEfmt "), Some(ItemType::Sound));
        assert_eq!(detect_binary_type(b"PK\x03\x04\x14\x00\x00\x00"), Some(ItemType::Binary));
        assert_eq!(detect_binary_type(MENU), None);
        assert_eq!(detect_binary_type(b""), None);
    }

    #[tokio::test]
    async fn save_as_writes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.txt");
        let page = Page::new(MENU.to_vec(), ItemType::Menu, address());

        page.save_as(&path, &crate::sink::FsSink).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), MENU);
    }
}
