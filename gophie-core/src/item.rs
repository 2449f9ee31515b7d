use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::address::{Address, DEFAULT_PORT};
use crate::error::MenuLineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    TextFile,
    Menu,
    CcsoNameserver,
    Error,
    BinHex,
    DosFile,
    Uuencoded,
    Search,
    Telnet,
    Binary,
    Mirror,
    Gif,
    Image,
    Telnet3270,
    Html,
    Info,
    Sound,
    Unknown,
}

struct TypeInfo {
    code: char,
    itype: ItemType,
    extension: &'static str,
    name: &'static str,
    mime: &'static str,
    binary: bool,
}

const fn row(
    code: char,
    itype: ItemType,
    extension: &'static str,
    name: &'static str,
    mime: &'static str,
    binary: bool,
) -> TypeInfo {
    TypeInfo {
        code,
        itype,
        extension,
        name,
        mime,
        binary,
    }
}

/// Every lookup in either direction goes through this table. `Unknown` is the
/// last row and doubles as the fallback for codes that are not listed.
static TYPE_TABLE: [TypeInfo; 18] = [
    row('0', ItemType::TextFile, "txt", "Text file", "text/plain", false),
    row('1', ItemType::Menu, "gophermap", "Gopher menu", "application/x-gopher-menu", false),
    row('2', ItemType::CcsoNameserver, "ccso", "CCSO Nameserver", "text/plain", false),
    row('3', ItemType::Error, "error", "Error code", "text/plain", false),
    row('4', ItemType::BinHex, "hqx", "BinHex file (Macintosh)", "application/mac-binhex40", true),
    row('5', ItemType::DosFile, "dat", "DOS file", "application/octet-stream", true),
    row('6', ItemType::Uuencoded, "uue", "uuencoded file", "text/x-uuencode", true),
    row('7', ItemType::Search, "txt", "Full-text search", "application/x-gopher-menu", false),
    row('8', ItemType::Telnet, "txt", "Telnet", "text/plain", false),
    row('9', ItemType::Binary, "dat", "Binary file", "application/octet-stream", true),
    row('+', ItemType::Mirror, "txt", "Mirror", "application/x-gopher-menu", false),
    row('g', ItemType::Gif, "gif", "GIF file", "image/gif", false),
    row('I', ItemType::Image, "jpg", "Image file", "image/jpeg", false),
    row('T', ItemType::Telnet3270, "txt", "Telnet 3270", "text/plain", false),
    row('h', ItemType::Html, "htm", "HTML file", "text/html", false),
    row('i', ItemType::Info, "txt", "Information", "text/plain", false),
    row('s', ItemType::Sound, "wav", "Sound file", "audio/x-wav", true),
    row('?', ItemType::Unknown, "dat", "Unknown", "application/octet-stream", false),
];

impl ItemType {
    fn info(self) -> &'static TypeInfo {
        TYPE_TABLE
            .iter()
            .find(|row| row.itype == self)
            .unwrap_or(&TYPE_TABLE[TYPE_TABLE.len() - 1])
    }

    pub fn to_char(self) -> char {
        self.info().code
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn mime(self) -> &'static str {
        self.info().mime
    }

    pub fn default_extension(self) -> &'static str {
        self.info().extension
    }

    /// Binary items are handed to the download path instead of being rendered.
    pub fn is_binary(self) -> bool {
        self.info().binary
    }

    /// Information lines and unknown items carry no navigable link.
    pub fn is_navigable(self) -> bool {
        !matches!(self, ItemType::Info | ItemType::Unknown)
    }

    pub fn all() -> impl Iterator<Item = ItemType> {
        TYPE_TABLE.iter().map(|row| row.itype)
    }
}

impl From<char> for ItemType {
    fn from(c: char) -> Self {
        TYPE_TABLE
            .iter()
            .find(|row| row.code == c)
            .map_or(ItemType::Unknown, |row| row.itype)
    }
}

/// One entry of a Gopher menu, or a synthesized entry for a resource that
/// was reached by typing its address.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MenuItem {
    code: char,
    itype: ItemType,
    pub display: String,
    pub selector: String,
    pub host: String,
    pub port: u16,
}

impl MenuItem {
    /// Decodes a single menu line:
    /// `<type><display>\t<selector>\t<host>\t<port>`.
    ///
    /// Missing fields keep their defaults. An unparsable port is logged and
    /// the default port is kept.
    pub fn parse(line: &str) -> Result<Self, MenuLineError> {
        let line: String = line.chars().filter(|c| *c != '\r' && *c != '\n').collect();

        if let Some(c) = line.chars().find(|c| is_binary_control(*c)) {
            return Err(MenuLineError::ControlCharacter(u32::from(c)));
        }

        let mut chars = line.chars();
        let code = chars.next().ok_or(MenuLineError::Empty)?;
        let mut fields = chars.as_str().split('\t');

        let display = fields.next().unwrap_or_default().to_string();
        let selector = fields.next().map(str::trim).unwrap_or_default().to_string();
        let host = fields.next().map(str::trim).unwrap_or_default().to_string();
        let port = match fields.next().map(str::trim) {
            Some(value) => value.parse::<u16>().unwrap_or_else(|e| {
                warn!(port = %value, error = %e, "Menu line port is not a number, using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        Ok(MenuItem {
            code,
            itype: ItemType::from(code),
            display,
            selector,
            host,
            port,
        })
    }

    /// Builds an item for a resource reached by address rather than via a
    /// menu entry. The display string is the resource's file name.
    pub fn from_address(itype: ItemType, address: &Address) -> Self {
        let mut item = MenuItem {
            code: itype.to_char(),
            itype,
            display: String::new(),
            selector: address.selector().to_string(),
            host: address.host().to_string(),
            port: address.port(),
        };
        item.display = item.file_name();
        item
    }

    pub fn from_code(code: char, address: &Address) -> Self {
        let mut item = Self::from_address(ItemType::from(code), address);
        item.code = code;
        item
    }

    pub fn type_code(&self) -> char {
        self.code
    }

    pub fn item_type(&self) -> ItemType {
        self.itype
    }

    pub fn is_binary(&self) -> bool {
        self.itype.is_binary()
    }

    pub fn type_name(&self) -> &'static str {
        self.itype.name()
    }

    /// The item's link target. Selectors starting with `URL:` or `/URL:`
    /// carry an external URL verbatim; everything else becomes a
    /// `gopher://` URL. Items without a link yield an empty string.
    pub fn url(&self) -> String {
        if !self.itype.is_navigable() {
            return String::new();
        }

        if let Some(external) = self
            .selector
            .strip_prefix("/URL:")
            .or_else(|| self.selector.strip_prefix("URL:"))
        {
            return external.to_string();
        }

        let mut result = format!("gopher://{}", self.host);
        if self.port != DEFAULT_PORT {
            result.push(':');
            result.push_str(&self.port.to_string());
        }
        if !self.selector.starts_with('/') {
            result.push('/');
        }
        result.push_str(&self.selector);
        result
    }

    /// The address this item points to, when it is a Gopher link.
    pub fn address(&self) -> Option<Address> {
        let url = self.url();
        if url.starts_with("gopher://") {
            Some(Address::new(self.host.clone(), self.port, self.selector.clone()))
        } else {
            None
        }
    }

    pub fn file_name(&self) -> String {
        let url = self.url();
        match url.rfind('/') {
            Some(pos) if pos > 0 => url[pos + 1..].to_string(),
            _ => url,
        }
    }

    /// Extension of the file name, `txt` when there is none.
    pub fn file_ext(&self) -> String {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos > 0 => name[pos + 1..].to_string(),
            _ => "txt".to_string(),
        }
    }

    /// File name with the type's default extension appended when the name
    /// has no extension of its own.
    pub fn file_name_with_forced_ext(&self) -> String {
        let name = self.file_name();
        if name.contains('.') {
            name
        } else {
            format!("{}.{}", name, self.itype.default_extension())
        }
    }
}

/// Control characters that never appear in a text menu. Tabs separate
/// fields; escape and form feed show up in decorated menus.
fn is_binary_control(c: char) -> bool {
    c.is_ascii_control() && !matches!(c, '\t' | '\x0b' | '\x0c' | '\x1b' | '\x7f')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_menu_line() {
        let item = MenuItem::parse("1Menu Title\t/selector\thost.example\t70").unwrap();
        assert_eq!(item.item_type(), ItemType::Menu);
        assert_eq!(item.type_code(), '1');
        assert_eq!(item.display, "Menu Title");
        assert_eq!(item.selector, "/selector");
        assert_eq!(item.host, "host.example");
        assert_eq!(item.port, 70);
    }

    #[test]
    fn strips_terminators_and_trims_fields() {
        let item = MenuItem::parse("0About \t /about.txt \t host \t 7070 \r\n").unwrap();
        assert_eq!(item.display, "About ");
        assert_eq!(item.selector, "/about.txt");
        assert_eq!(item.host, "host");
        assert_eq!(item.port, 7070);
    }

    #[test]
    fn bad_port_keeps_default() {
        let item = MenuItem::parse("0Doc\t/doc\thost\tseventy").unwrap();
        assert_eq!(item.port, DEFAULT_PORT);

        let item = MenuItem::parse("0Doc\t/doc\thost\t99999").unwrap();
        assert_eq!(item.port, DEFAULT_PORT);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let item = MenuItem::parse("iJust some info").unwrap();
        assert_eq!(item.item_type(), ItemType::Info);
        assert_eq!(item.display, "Just some info");
        assert_eq!(item.selector, "");
        assert_eq!(item.host, "");
        assert_eq!(item.port, DEFAULT_PORT);
        assert_eq!(item.url(), "");

        let item = MenuItem::parse("1").unwrap();
        assert_eq!(item.display, "");
    }

    #[test]
    fn rejects_empty_and_binary_lines() {
        assert_eq!(MenuItem::parse(""), Err(MenuLineError::Empty));
        assert_eq!(MenuItem::parse("\r\n"), Err(MenuLineError::Empty));
        assert_eq!(
            MenuItem::parse("9bin\0ary"),
            Err(MenuLineError::ControlCharacter(0))
        );
    }

    #[test]
    fn unknown_codes_map_to_unknown() {
        let item = MenuItem::parse("xWeird\t/w\thost\t70").unwrap();
        assert_eq!(item.item_type(), ItemType::Unknown);
        assert_eq!(item.type_code(), 'x');
        assert_eq!(ItemType::Unknown.to_char(), '?');
        assert_eq!(item.url(), "");
    }

    #[test]
    fn code_lookup_round_trips() {
        for code in "0123456789+gIThis?".chars() {
            let itype = ItemType::from(code);
            assert_eq!(ItemType::from(itype.to_char()), itype, "code {:?}", code);
            assert_eq!(itype.to_char(), code);
        }
        for itype in ItemType::all() {
            assert_eq!(ItemType::from(itype.to_char()), itype);
        }
    }

    #[test]
    fn binary_classification() {
        let binary: Vec<char> = ItemType::all()
            .filter(|t| t.is_binary())
            .map(ItemType::to_char)
            .collect();
        assert_eq!(binary, vec!['4', '5', '6', '9', 's']);
    }

    #[test]
    fn metadata_for_common_types() {
        assert_eq!(ItemType::Menu.default_extension(), "gophermap");
        assert_eq!(ItemType::Gif.default_extension(), "gif");
        assert_eq!(ItemType::Unknown.default_extension(), "dat");
        assert_eq!(ItemType::BinHex.name(), "BinHex file (Macintosh)");
        assert_eq!(ItemType::Html.mime(), "text/html");
    }

    #[test]
    fn external_urls_pass_through() {
        let item = MenuItem::parse("hHome page\tURL:https://example.org/\thost\t70").unwrap();
        assert_eq!(item.url(), "https://example.org/");
        assert_eq!(item.address(), None);

        let item = MenuItem::parse("hMail\t/URL:mailto:me@example.org\thost\t70").unwrap();
        assert_eq!(item.url(), "mailto:me@example.org");
    }

    #[test]
    fn gopher_urls_are_synthesized() {
        let item = MenuItem::parse("0Readme\treadme.txt\thost\t7070").unwrap();
        assert_eq!(item.url(), "gopher://host:7070/readme.txt");
        assert_eq!(item.file_name(), "readme.txt");
        assert_eq!(item.file_ext(), "txt");

        let item = MenuItem::parse("9Archive\t/pub/file.tar.gz\thost\t70").unwrap();
        assert_eq!(item.url(), "gopher://host/pub/file.tar.gz");
        assert_eq!(item.file_ext(), "gz");
        assert_eq!(item.address(), Some(Address::new("host", 70, "/pub/file.tar.gz")));
    }

    #[test]
    fn forced_extension_uses_type_default() {
        let item = MenuItem::parse("sSong\t/music/song\thost\t70").unwrap();
        assert_eq!(item.file_name(), "song");
        assert_eq!(item.file_ext(), "txt");
        assert_eq!(item.file_name_with_forced_ext(), "song.wav");

        let item = MenuItem::parse("gPic\t/pic.gif\thost\t70").unwrap();
        assert_eq!(item.file_name_with_forced_ext(), "pic.gif");
    }

    #[test]
    fn synthesized_from_address() {
        let address = Address::parse("host:7070/files/data.bin").unwrap();
        let item = MenuItem::from_address(ItemType::Binary, &address);
        assert_eq!(item.type_code(), '9');
        assert_eq!(item.display, "data.bin");
        assert_eq!(item.port, 7070);

        let item = MenuItem::from_code('g', &address);
        assert_eq!(item.item_type(), ItemType::Gif);
        assert_eq!(item.type_code(), 'g');
    }
}
