#![cfg_attr(not(feature = "std"), no_std)]

//! `ripple-core` 提供请求/响应载荷传输所依赖的零拷贝数据缓冲原语。
//!
//! # 模块定位（Why）
//! - 网络服务的各层（传输、协议、业务处理器）需要一个带独立读写游标的
//!   字节缓冲类型，在组件边界之间传递时不复制数据；
//! - 池化场景下还需要显式的引用计数纪律，由最后一次 `release` 决定
//!   底层内存何时归还分配器，任何遗漏都必须可被诊断层观测到。
//!
//! # 设计概要（How）
//! - [`buf`] 模块实现核心类型 [`DataBuf`]：容量、读写游标、结构化的
//!   Simple/Composite 存储变体，以及拆分、拼接与零拷贝视图迭代器；
//! - [`lease`] 模块将缓冲与池之间的生命周期协作显式化为
//!   [`BufRecycler`] 回收契约与内部租约计数；
//! - [`encoding`] 与 [`stream`]（仅 `std`）分别补足文本编解码与
//!   `std::io` 适配，使缓冲能直接接入传统的流式调用方。
//!
//! # 命名约定（Consistency）
//! - 游标术语沿用“读位置/写位置”（read/write position），可读区间为
//!   `[read, write)`，可写区间为 `[write, capacity)`；
//! - 错误码统一采用 `buffer.<语义>` 形式，见 [`error::codes`]。

extern crate alloc;

pub mod buf;
pub mod encoding;
pub mod error;
pub mod lease;
#[cfg(feature = "std")]
pub mod stream;

pub use buf::{BufProbe, DataBuf, ReadableViews, WritableViews};
pub use encoding::TextEncoding;
pub use error::{BufError, Result, codes};
pub use lease::{BufRecycler, ReclaimedBuf};
#[cfg(feature = "std")]
pub use stream::{BufReadStream, BufWriteStream};
