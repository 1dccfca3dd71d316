//! `std::io` 适配层：把缓冲接入传统的流式读写调用方。
//!
//! # 设计背景（Why）
//! - 协议实现之外仍有大量基于 `Read`/`Write` 的现成组件（压缩器、
//!   序列化器等），为它们逐一改造缓冲 API 不现实；
//! - 读侧流还承担一次生命周期职责：按需在关闭时释放池化缓冲，使
//!   “消费完即归还”的惯用法不必手写释放逻辑。

use std::io;

use crate::buf::DataBuf;
use crate::error::{BufError, Result};

impl DataBuf {
    /// 将缓冲转为 `Read` 流。
    ///
    /// `release_on_close` 为真时，流关闭（或被丢弃）的同时对缓冲执行
    /// 一次 `release`；为假时关闭后缓冲原样返还调用方。
    pub fn into_read_stream(self, release_on_close: bool) -> BufReadStream {
        BufReadStream {
            inner: Some(self),
            release_on_close,
            mark: None,
        }
    }

    /// 借出 `Write` 流，写入即追加到本缓冲。
    pub fn write_stream(&mut self) -> BufWriteStream<'_> {
        BufWriteStream { buf: self }
    }
}

/// 消费缓冲可读区间的 `Read` 流。
///
/// # 契约说明（What）
/// - `read` 按缓冲读位置顺序消费，可读区间耗尽后返回 `Ok(0)`；
/// - `mark`/`reset` 提供单档回退：`reset` 回到最近一次 `mark` 记录的
///   读位置，未曾标记时报 `InvalidArgument`；
/// - 流关闭恰好触发至多一次 `release`（受构造参数控制），显式
/// `close` 与隐式丢弃等效。
pub struct BufReadStream {
    inner: Option<DataBuf>,
    release_on_close: bool,
    mark: Option<usize>,
}

impl BufReadStream {
    /// 剩余可读字节数。
    pub fn available(&self) -> usize {
        self.inner
            .as_ref()
            .map(DataBuf::readable_byte_count)
            .unwrap_or(0)
    }

    /// 记录当前读位置，供 `reset` 回退。
    pub fn mark(&mut self) {
        self.mark = self.inner.as_ref().map(DataBuf::read_position);
    }

    /// 回退到最近一次 `mark` 记录的读位置。
    pub fn reset(&mut self) -> Result<()> {
        let mark = self
            .mark
            .ok_or_else(|| BufError::invalid_argument("未曾 mark，无法 reset"))?;
        match self.inner.as_mut() {
            Some(buf) => buf.set_read_position(mark),
            None => Err(BufError::invalid_argument("流已关闭，无法 reset")),
        }
    }

    /// 显式关闭流。
    ///
    /// `release_on_close` 为真时执行一次 `release` 并返回 `None`；
    /// 否则将缓冲原样返还。
    pub fn close(mut self) -> Result<Option<DataBuf>> {
        match self.inner.take() {
            Some(mut buf) => {
                if self.release_on_close {
                    buf.release()?;
                    Ok(None)
                } else {
                    Ok(Some(buf))
                }
            }
            None => Ok(None),
        }
    }
}

impl io::Read for BufReadStream {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let Some(buf) = self.inner.as_mut() else {
            return Ok(0);
        };
        let count = dst.len().min(buf.readable_byte_count());
        if count == 0 {
            return Ok(0);
        }
        buf.read_into(&mut dst[..count])?;
        Ok(count)
    }
}

impl Drop for BufReadStream {
    fn drop(&mut self) {
        // 未显式 close 的流在丢弃时补上同一份释放义务；
        // 此处的错误无处上抛，丢弃即可（缓冲自身的 Drop 仍会暂存内存）。
        if self.release_on_close {
            if let Some(mut buf) = self.inner.take() {
                let _ = buf.release();
            }
        }
    }
}

/// 追加写入缓冲的 `Write` 流。
///
/// 写入等价于 `put_slice`，空间不足时自动扩容；`flush` 为无操作。
pub struct BufWriteStream<'a> {
    buf: &'a mut DataBuf,
}

impl io::Write for BufWriteStream<'_> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(src)?;
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    /// 读流应顺序消费可读区间并以 Ok(0) 表示耗尽。
    #[test]
    fn read_stream_drains_readable_span() {
        let mut buf = DataBuf::with_capacity(8);
        buf.put_slice(b"hello").expect("写入应成功");
        let mut stream = buf.into_read_stream(false);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("读取应成功");
        assert_eq!(out, b"hello");
        assert_eq!(stream.available(), 0);
    }

    /// mark/reset 应回退读位置，重读同一段数据。
    #[test]
    fn mark_and_reset_replay_bytes() {
        let mut buf = DataBuf::with_capacity(8);
        buf.put_slice(b"abcd").expect("写入应成功");
        let mut stream = buf.into_read_stream(false);
        let mut first = [0u8; 2];
        stream.read_exact(&mut first).expect("读取应成功");
        stream.mark();
        let mut second = [0u8; 2];
        stream.read_exact(&mut second).expect("读取应成功");
        stream.reset().expect("reset 应成功");
        let mut replay = [0u8; 2];
        stream.read_exact(&mut replay).expect("重读应成功");
        assert_eq!(second, replay);
    }

    /// 未曾 mark 时 reset 应失败。
    #[test]
    fn reset_without_mark_is_rejected() {
        let buf = DataBuf::with_capacity(4);
        let mut stream = buf.into_read_stream(false);
        assert!(stream.reset().is_err());
    }

    /// 写流应追加到缓冲并保持纯追加语义。
    #[test]
    fn write_stream_appends_to_buffer() {
        let mut buf = DataBuf::with_capacity(4);
        buf.put_slice(b"ab").expect("写入应成功");
        {
            let mut stream = buf.write_stream();
            stream.write_all(b"cdef").expect("流式写入应成功");
            stream.flush().expect("flush 不应失败");
        }
        assert_eq!(buf.to_vec(), b"abcdef");
    }

    /// 非释放模式下 close 应原样返还缓冲。
    #[test]
    fn close_returns_buffer_when_not_releasing() {
        let mut buf = DataBuf::with_capacity(8);
        buf.put_slice(b"xy").expect("写入应成功");
        let mut stream = buf.into_read_stream(false);
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).expect("读取应成功");
        let returned = stream.close().expect("关闭应成功").expect("应返还缓冲");
        assert_eq!(returned.read_position(), 1);
    }
}
