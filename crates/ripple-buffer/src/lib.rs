#![cfg_attr(not(feature = "std"), no_std)]

//! `ripple-buffer` 提供缓冲的分配侧实现：池、工厂与泄漏诊断。
//!
//! # 模块定位（Why）
//! - [`pool`] 的 `ArenaPool` 是池化 `DataBuf` 的默认来源：自由链表复用
//!   底层内存，原子指标支撑监控，驻留上限提供背压；
//! - [`factory`] 把“从哪里拿缓冲”收敛为 `BufFactory` 契约，部署侧以
//!   `AllocationStrategy` 在池化/非池化与直接偏好之间切换，业务代码
//!   不感知差异；
//! - [`leak`]（仅 `std`）以装饰器形式补足手动引用计数的观测短板，
//!   在用例末尾断言“全部归还”。

extern crate alloc;

pub mod factory;
#[cfg(feature = "std")]
pub mod leak;
pub mod pool;

pub use factory::{
    AllocationStrategy, BufFactory, DEFAULT_INITIAL_CAPACITY, PooledBufFactory, UnpooledBufFactory,
};
#[cfg(feature = "std")]
pub use leak::LeakAwareBufFactory;
pub use pool::{ArenaPool, PoolStatDimension, PoolStats};
