use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::BufError;

/// `TextEncoding` 描述字符串写入/读出缓冲时采用的字节编码。
///
/// # 设计背景（Why）
/// - 缓冲契约要求 `write_str`/`to_text` 携带显式编码参数，而不是隐含
///   假定 UTF-8，这样协议层在处理遗留编码（如 HTTP 头部的 Latin-1）时
///   不必绕过缓冲 API 自行转换；
/// - Rust 的 `&str` 天然保证合法 UTF-8，因此“编码缺失”在类型层面即不可
///   表达；编码失败（目标字符集无法表示的字符、非法字节序列）统一以
///   `buffer.invalid_argument` 上抛。
///
/// # 契约说明（What）
/// - `encode` 输出的字节序列追加写入缓冲后，用同一编码 `decode` 必须
///   还原原字符串（各变体均为无损映射）；
/// - `Ascii`/`Latin1` 在遇到超出值域的字符时失败，不做有损替换。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    /// 变长 UTF-8，编码侧永不失败。
    Utf8,
    /// 7 位 ASCII，编码与解码均要求全部字节小于 0x80。
    Ascii,
    /// ISO-8859-1，码点与字节一一对应，解码侧永不失败。
    Latin1,
}

impl TextEncoding {
    /// 将字符串编码为字节序列；UTF-8/ASCII 直接借用原始字节。
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>, BufError> {
        match self {
            TextEncoding::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            TextEncoding::Ascii => {
                if text.is_ascii() {
                    Ok(Cow::Borrowed(text.as_bytes()))
                } else {
                    Err(BufError::invalid_argument(
                        "字符串包含非 ASCII 字符，无法以 Ascii 编码写入",
                    ))
                }
            }
            TextEncoding::Latin1 => {
                let mut out = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xFF {
                        return Err(BufError::invalid_argument(
                            "字符串包含超出 Latin-1 值域的字符",
                        ));
                    }
                    out.push(code as u8);
                }
                Ok(Cow::Owned(out))
            }
        }
    }

    /// 将字节序列解码为字符串；失败时保留底层原因。
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, BufError> {
        match self {
            TextEncoding::Utf8 => core::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|err| {
                    BufError::invalid_argument("字节序列不是合法 UTF-8").with_cause(err)
                }),
            TextEncoding::Ascii => {
                if bytes.is_ascii() {
                    // ASCII 是 UTF-8 的子集，校验通过后可直接视作 str。
                    Ok(Cow::Borrowed(core::str::from_utf8(bytes).map_err(
                        |err| {
                            BufError::invalid_argument("ASCII 校验后解码失败").with_cause(err)
                        },
                    )?))
                } else {
                    Err(BufError::invalid_argument(
                        "字节序列包含非 ASCII 字节，无法以 Ascii 解码",
                    ))
                }
            }
            TextEncoding::Latin1 => {
                let mut out = String::with_capacity(bytes.len());
                for &byte in bytes {
                    out.push(byte as char);
                }
                Ok(Cow::Owned(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// UTF-8 编码应借用原始字节且解码还原。
    #[test]
    fn utf8_round_trips_without_copy() {
        let encoded = TextEncoding::Utf8.encode("缓冲 €").expect("UTF-8 编码不应失败");
        assert!(matches!(encoded, Cow::Borrowed(_)));
        let decoded = TextEncoding::Utf8.decode(&encoded).expect("解码应成功");
        assert_eq!(decoded, "缓冲 €");
    }

    /// ASCII 编码遇到多字节字符时应明确失败。
    #[test]
    fn ascii_rejects_wide_characters() {
        assert!(TextEncoding::Ascii.encode("€").is_err());
        assert!(TextEncoding::Ascii.decode(&[0xE2, 0x82, 0xAC]).is_err());
    }

    /// Latin-1 与码点一一对应，0xFF 以内应无损往返。
    #[test]
    fn latin1_round_trips_high_bytes() {
        let encoded = TextEncoding::Latin1.encode("naïve").expect("Latin-1 编码应成功");
        let decoded = TextEncoding::Latin1.decode(&encoded).expect("解码应成功");
        assert_eq!(decoded, "naïve");
        assert!(TextEncoding::Latin1.encode("€").is_err(), "€ 超出 Latin-1 值域");
    }
}
