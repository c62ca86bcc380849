/// 预览长度（日志与通知中只暴露前 N 个字符）
pub const PREVIEW_LEN: usize = 10;

/// QR 码内容分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenClass {
    Open,
    Close,
    Test,
    Unknown,
}

impl TokenClass {
    pub const ALL: [TokenClass; 4] = [
        TokenClass::Open,
        TokenClass::Close,
        TokenClass::Test,
        TokenClass::Unknown,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        match self {
            TokenClass::Open => 0,
            TokenClass::Close => 1,
            TokenClass::Test => 2,
            TokenClass::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenClass::Open => "OPEN",
            TokenClass::Close => "CLOSE",
            TokenClass::Test => "TEST",
            TokenClass::Unknown => "UNKNOWN",
        }
    }

    /// Webhook 文本；UNKNOWN 不对外发送
    pub fn webhook_message(self) -> Option<&'static str> {
        match self {
            TokenClass::Open => Some("あけた"),
            TokenClass::Close => Some("しめた"),
            TokenClass::Test => Some("test"),
            TokenClass::Unknown => None,
        }
    }
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured secret tokens. Decoded text is matched exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub open: String,
    pub close: String,
    pub test: String,
}

impl TokenSet {
    pub fn new(open: impl Into<String>, close: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
            test: test.into(),
        }
    }

    pub fn classify(&self, text: &str) -> TokenClass {
        if text == self.open {
            TokenClass::Open
        } else if text == self.close {
            TokenClass::Close
        } else if text == self.test {
            TokenClass::Test
        } else {
            TokenClass::Unknown
        }
    }
}

/// 截取前 `max_chars` 个字符，超出部分以 `...` 表示
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
