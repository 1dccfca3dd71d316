//! 数据缓冲原语：读写游标、结构化存储与生命周期操作。

mod storage;
mod views;

pub use views::{ReadableViews, WritableViews};

use alloc::borrow::Cow;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use bytes::BytesMut;

use storage::{Region, Storage};

use crate::encoding::TextEncoding;
use crate::error::{BufError, Result};
use crate::lease::{BufRecycler, Lease};

/// `DataBuf` 是面向请求/响应载荷的核心字节缓冲。
///
/// # 设计动机（Why）
/// - 读与写各持独立游标，协议层可以边写边读而无需来回翻转模式；
/// - 存储以 Simple/Composite 变体组织：简单缓冲持有单一连续区段，
///   拼接缓冲按序持有多个区段，读写按全局偏移跨区段分派，拆分与
///   拼接都不搬移字节；
/// - 池化缓冲在区段上附带租约，`retain`/`release` 以原子计数仲裁
///   底层内存的归还时机，最后一次释放触发池回调。
///
/// # 不变量（What）
/// - 任何成功返回的操作之后恒有 `0 <= read <= write <= capacity`；
/// - 写入只追加，绝不改写 `[0, write)` 中已有的字节；扩容保留全部
///   已写内容；
/// - 进入 `Released` 终态后，除 `is_allocated` 等只读探询外的一切
///   操作均以错误拒绝，不存在复活路径。
///
/// # 并发模型（Trade-offs）
/// - 游标与内容的修改要求 `&mut self`，单个实例同一时刻只有一个
///   逻辑所有者，跨线程转移所有权即完成交接；
/// - 引用计数本身为原子操作，持有各自句柄的多个线程可以并发地
///   `retain`/`release`，这是 I/O 完成回调与请求线程协作的预期用法。
pub struct DataBuf {
    storage: Storage,
    read_pos: usize,
    write_pos: usize,
}

impl DataBuf {
    /// 创建指定容量的空缓冲（非池化），游标均为 0。
    pub fn with_capacity(capacity: usize) -> Self {
        let mut mem = BytesMut::with_capacity(capacity);
        mem.resize(capacity, 0);
        Self {
            storage: Storage::Simple(Region::unpooled(mem)),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// 以池分配的内存与回收句柄创建池化缓冲，引用计数自 1 起。
    ///
    /// `mem` 的全部容量都会纳入租约统计；未写入的尾部被零填充，
    /// 保证之后任何游标位置的读取都落在已初始化内存上。
    pub fn pooled(mut mem: BytesMut, recycler: Arc<dyn BufRecycler>) -> Self {
        let capacity = mem.capacity();
        mem.resize(capacity, 0);
        let lease = Arc::new(Lease::new(capacity, recycler));
        Self {
            storage: Storage::Simple(Region {
                mem,
                lease: Some(lease),
            }),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// 零拷贝包装外部内存；内容视为已写入（写位置为长度，读位置为 0）。
    ///
    /// 包装不建立池租约：外部内存不归任何池所有，`release` 对其为
    /// 无操作。
    pub fn wrap(mem: BytesMut) -> Self {
        let len = mem.len();
        Self {
            storage: Storage::Simple(Region::unpooled(mem)),
            read_pos: 0,
            write_pos: len,
        }
    }

    /// 按序拼接多个缓冲为一个组合缓冲。
    ///
    /// # 契约说明（What）
    /// - 仅各输入的可读区间 `[read, write)` 被零拷贝地并入结果，
    ///   已读前缀与未写尾部在此处丢弃；
    /// - 结果的可读字节数等于各输入可读字节数之和，读位置为 0；
    /// - 输入中的池租约随区段转入组合缓冲，即便某个输入不再贡献
    ///   字节，其租约仍由组合缓冲代为持有并在释放时一并清算。
    ///
    /// # 失败条件
    /// - 任一输入已处于释放终态时返回 `InvalidArgument`。
    pub fn compose(parts: Vec<DataBuf>) -> Result<Self> {
        let mut regions = Vec::new();
        for mut part in parts {
            part.ensure_active("compose")?;
            let (storage, read, write) = part.take_storage();
            match storage {
                Storage::Simple(region) => {
                    append_trimmed(&mut regions, vec![region], read, write);
                }
                Storage::Composite(children) => {
                    append_trimmed(&mut regions, children, read, write);
                }
                Storage::Released => unreachable!("状态守卫已拦截"),
            }
        }
        let write_pos = regions.iter().map(Region::len).sum();
        Ok(Self {
            storage: Storage::Composite(regions),
            read_pos: 0,
            write_pos,
        })
    }

    // ---- 游标与派生量 -------------------------------------------------

    /// 当前总容量。
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// 当前读位置。
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// 当前写位置。
    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// 已写入但尚未读取的字节数。
    pub fn readable_byte_count(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// 无需扩容即可继续写入的字节数。
    pub fn writable_byte_count(&self) -> usize {
        self.capacity() - self.write_pos
    }

    /// 绝对设置读位置；超过写位置时拒绝。
    pub fn set_read_position(&mut self, pos: usize) -> Result<()> {
        self.ensure_active("set_read_position")?;
        if pos > self.write_pos {
            return Err(BufError::out_of_range(format!(
                "读位置 {pos} 不得超过写位置 {}",
                self.write_pos
            )));
        }
        self.read_pos = pos;
        Ok(())
    }

    /// 绝对设置写位置；低于读位置或超出容量时拒绝。
    pub fn set_write_position(&mut self, pos: usize) -> Result<()> {
        self.ensure_active("set_write_position")?;
        if pos < self.read_pos {
            return Err(BufError::out_of_range(format!(
                "写位置 {pos} 不得低于读位置 {}",
                self.read_pos
            )));
        }
        let capacity = self.capacity();
        if pos > capacity {
            return Err(BufError::out_of_range(format!(
                "写位置 {pos} 超出容量 {capacity}"
            )));
        }
        self.write_pos = pos;
        Ok(())
    }

    /// 读位置前移 `count` 字节。
    pub fn advance_read(&mut self, count: usize) -> Result<()> {
        let target = self.read_pos.checked_add(count).ok_or_else(|| {
            BufError::out_of_range("读位置前移溢出")
        })?;
        self.set_read_position(target)
    }

    /// 写位置前移 `count` 字节，使经由可写视图写入的数据立即可读。
    pub fn advance_write(&mut self, count: usize) -> Result<()> {
        let target = self.write_pos.checked_add(count).ok_or_else(|| {
            BufError::out_of_range("写位置前移溢出")
        })?;
        self.set_write_position(target)
    }

    // ---- 写入 ---------------------------------------------------------

    /// 确保至少还有 `additional` 字节的可写空间，必要时扩容。
    ///
    /// 扩容按“所需容量与当前容量两倍取大”增长，均摊扩容成本；
    /// `[0, write)` 中的内容全部保留。
    pub fn ensure_writable(&mut self, additional: usize) -> Result<()> {
        self.ensure_active("ensure_writable")?;
        let needed = self.write_pos.checked_add(additional).ok_or_else(|| {
            BufError::out_of_range("容量请求溢出")
        })?;
        let capacity = self.capacity();
        if needed <= capacity {
            return Ok(());
        }
        let target = needed.max(capacity.saturating_mul(2));
        self.storage.grow_to(target);
        Ok(())
    }

    /// 追加单个字节。
    pub fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.put_slice(&[byte])
    }

    /// 追加一段字节，空间不足时自动扩容。
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_active("put_slice")?;
        if src.is_empty() {
            return Ok(());
        }
        self.ensure_writable(src.len())?;
        self.storage.write_at(self.write_pos, src);
        self.write_pos += src.len();
        Ok(())
    }

    /// 以指定编码追加字符串；空串追加零字节。
    ///
    /// 重复调用保持纯追加语义：编码长度变化不会影响已写入的数据。
    pub fn write_str(&mut self, text: &str, encoding: TextEncoding) -> Result<()> {
        let encoded = encoding.encode(text)?;
        self.put_slice(&encoded)
    }

    /// 从另一缓冲转写 `count` 字节，同步推进对方的读位置。
    pub fn write_from(&mut self, src: &mut DataBuf, count: usize) -> Result<()> {
        self.ensure_active("write_from")?;
        src.ensure_active("write_from(src)")?;
        if count > src.readable_byte_count() {
            return Err(BufError::out_of_range(format!(
                "源缓冲仅剩 {} 字节可读，无法转写 {count} 字节",
                src.readable_byte_count()
            )));
        }
        self.ensure_writable(count)?;
        let mut remaining = count;
        while remaining > 0 {
            let step = {
                let chunk = src.storage.chunk_at(src.read_pos, remaining);
                self.storage.write_at(self.write_pos, chunk);
                self.write_pos += chunk.len();
                chunk.len()
            };
            src.read_pos += step;
            remaining -= step;
        }
        Ok(())
    }

    /// 转写另一缓冲的全部可读字节。
    pub fn put_from(&mut self, src: &mut DataBuf) -> Result<()> {
        let count = src.readable_byte_count();
        self.write_from(src, count)
    }

    // ---- 读取与随机访问 -----------------------------------------------

    /// 读取读位置处的字节并前移一位；无未读字节时返回 `OutOfRange`。
    ///
    /// 读尽语义在本库中统一为错误而非哨兵值，调用方以
    /// `readable_byte_count` 预判剩余量。
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_active("read_u8")?;
        if self.read_pos >= self.write_pos {
            return Err(BufError::out_of_range("已无未读字节"));
        }
        let byte = self.storage.byte_at(self.read_pos);
        self.read_pos += 1;
        Ok(byte)
    }

    /// 填满 `dst` 并同步前移读位置；剩余可读不足时整体拒绝。
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        self.ensure_active("read_into")?;
        if dst.len() > self.readable_byte_count() {
            return Err(BufError::out_of_range(format!(
                "剩余可读 {} 字节，无法填满 {} 字节的目标",
                self.readable_byte_count(),
                dst.len()
            )));
        }
        self.storage.read_at(self.read_pos, dst);
        self.read_pos += dst.len();
        Ok(())
    }

    /// 随机读取绝对下标处的字节，不移动游标；下标须落在已写区间。
    pub fn byte_at(&self, index: usize) -> Result<u8> {
        self.ensure_active("byte_at")?;
        if index >= self.write_pos {
            return Err(BufError::out_of_range(format!(
                "下标 {index} 超出已写区间 [0, {})",
                self.write_pos
            )));
        }
        Ok(self.storage.byte_at(index))
    }

    /// 将 `[index, index + count)` 复制到 `dst[dst_offset..]`，不移动游标。
    pub fn copy_range_into(
        &self,
        index: usize,
        dst: &mut [u8],
        dst_offset: usize,
        count: usize,
    ) -> Result<()> {
        self.ensure_active("copy_range_into")?;
        let end = index.checked_add(count).ok_or_else(|| {
            BufError::out_of_range("复制区间溢出")
        })?;
        if end > self.write_pos {
            return Err(BufError::out_of_range(format!(
                "复制区间 [{index}, {end}) 超出已写区间 [0, {})",
                self.write_pos
            )));
        }
        let dst_end = dst_offset.checked_add(count).ok_or_else(|| {
            BufError::out_of_range("目标区间溢出")
        })?;
        if dst_end > dst.len() {
            return Err(BufError::out_of_range(format!(
                "目标区间 [{dst_offset}, {dst_end}) 超出目标长度 {}",
                dst.len()
            )));
        }
        self.storage.read_at(index, &mut dst[dst_offset..dst_end]);
        Ok(())
    }

    /// 复制可读区间为扁平的 `Vec<u8>`，不移动游标。
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.readable_byte_count()];
        if !out.is_empty() {
            self.storage.read_at(self.read_pos, &mut out);
        }
        out
    }

    /// 以指定编码解码整个可读区间，不移动游标。
    pub fn to_text(&self, encoding: TextEncoding) -> Result<String> {
        self.ensure_active("to_text")?;
        self.decode_range(self.read_pos, self.readable_byte_count(), encoding)
    }

    /// 以指定编码解码 `[index, index + count)`，不移动游标。
    pub fn to_text_range(
        &self,
        index: usize,
        count: usize,
        encoding: TextEncoding,
    ) -> Result<String> {
        self.ensure_active("to_text_range")?;
        let end = index.checked_add(count).ok_or_else(|| {
            BufError::out_of_range("解码区间溢出")
        })?;
        if end > self.write_pos {
            return Err(BufError::out_of_range(format!(
                "解码区间 [{index}, {end}) 超出已写区间 [0, {})",
                self.write_pos
            )));
        }
        self.decode_range(index, count, encoding)
    }

    fn decode_range(&self, index: usize, count: usize, encoding: TextEncoding) -> Result<String> {
        let bytes: Cow<'_, [u8]> = match &self.storage {
            Storage::Simple(_) => Cow::Borrowed(self.storage.chunk_at(index, count)),
            Storage::Composite(_) => {
                let mut gathered = vec![0u8; count];
                if count > 0 {
                    self.storage.read_at(index, &mut gathered);
                }
                Cow::Owned(gathered)
            }
            Storage::Released => unreachable!("状态守卫已拦截"),
        };
        Ok(encoding.decode(&bytes)?.into_owned())
    }

    // ---- 查找 ---------------------------------------------------------

    /// 自 `from`（向下钳制到已写区间）起正向查找首个满足谓词的下标。
    ///
    /// `from` 不小于写位置时无可扫描区间，返回 `None`。
    pub fn index_of(&self, predicate: impl Fn(u8) -> bool, from: usize) -> Option<usize> {
        let start = from.min(self.write_pos);
        (start..self.write_pos).find(|&index| predicate(self.storage.byte_at(index)))
    }

    /// 自 `from`（向下钳制到最后一个已写下标）起反向查找。
    pub fn last_index_of(&self, predicate: impl Fn(u8) -> bool, from: usize) -> Option<usize> {
        if self.write_pos == 0 {
            return None;
        }
        let start = from.min(self.write_pos - 1);
        (0..=start)
            .rev()
            .find(|&index| predicate(self.storage.byte_at(index)))
    }

    // ---- 结构操作 -----------------------------------------------------

    /// 拆出 `[0, index)` 为新缓冲，原缓冲原地变为剩余部分并从 0 重编号。
    ///
    /// # 契约说明（What）
    /// - 新缓冲的游标为原游标在 `[0, index]` 内的钳制值；原缓冲的游标
    ///   同步减去 `index`（向下饱和到 0），容量相应缩减；
    /// - `index > capacity` 时返回 `OutOfRange`；`index == capacity` 且
    ///   内容恰好耗尽时，剩余部分是容量为零的合法空缓冲，而非已释放
    ///   状态；
    /// - 池化缓冲的两侧共享租约且计数加一，各自独立释放，计数归零时
    ///   底层内存才回到池中。
    pub fn split_to(&mut self, index: usize) -> Result<DataBuf> {
        self.ensure_active("split_to")?;
        let capacity = self.capacity();
        if index > capacity {
            return Err(BufError::out_of_range(format!(
                "拆分点 {index} 超出容量 {capacity}"
            )));
        }
        let front_storage = self.storage.split_to(index);
        let front = DataBuf {
            storage: front_storage,
            read_pos: self.read_pos.min(index),
            write_pos: self.write_pos.min(index),
        };
        self.read_pos = self.read_pos.saturating_sub(index);
        self.write_pos = self.write_pos.saturating_sub(index);
        Ok(front)
    }

    /// 返回可读区间的零拷贝视图迭代器。
    pub fn readable_views(&self) -> ReadableViews<'_> {
        ReadableViews::new(&self.storage, self.read_pos, self.write_pos)
    }

    /// 返回可写区间的出借式视图迭代器；写入后以 [`advance_write`]
    /// 宣告字节数。
    ///
    /// [`advance_write`]: DataBuf::advance_write
    pub fn writable_views(&mut self) -> WritableViews<'_> {
        WritableViews::new(&mut self.storage, self.write_pos)
    }

    // ---- 生命周期 -----------------------------------------------------

    /// 是否由池分配（至少一个区段携带租约）。
    pub fn is_pooled(&self) -> bool {
        !self.storage.leases().is_empty()
    }

    /// 缓冲是否仍处于已分配状态。
    ///
    /// 非池化缓冲在释放终态之前恒为 `true`；池化缓冲以租约计数为准。
    pub fn is_allocated(&self) -> bool {
        if matches!(self.storage, Storage::Released) {
            return false;
        }
        let leases = self.storage.leases();
        if leases.is_empty() {
            return true;
        }
        leases.iter().any(|lease| lease.is_allocated())
    }

    /// 当前引用计数；非池化缓冲报告 0。
    pub fn ref_count(&self) -> usize {
        self.storage
            .leases()
            .iter()
            .map(|lease| lease.refs())
            .min()
            .unwrap_or(0)
    }

    /// 为新的长期持有者递增引用计数。
    ///
    /// 非池化缓冲为无操作；已释放的缓冲拒绝复活。
    pub fn retain(&self) -> Result<()> {
        if matches!(self.storage, Storage::Released) {
            return Err(BufError::invalid_argument("缓冲已释放，无法 retain"));
        }
        for lease in self.storage.leases() {
            lease.retain()?;
        }
        Ok(())
    }

    /// 递减引用计数；最终释放时将底层内存交还池并进入终态。
    ///
    /// # 契约说明（What）
    /// - 返回 `Ok(true)` 表示计数归零、底层内存已交还分配器，此后任何
    ///   操作都是调用方错误；`Ok(false)` 表示仍有其他持有者；
    /// - 对已处于终态的缓冲再次调用返回 `DoubleRelease`；
    /// - 非池化缓冲不参与计数，恒返回 `Ok(false)` 且保持可用。
    pub fn release(&mut self) -> Result<bool> {
        if matches!(self.storage, Storage::Released) {
            return Err(BufError::double_release("缓冲已释放，重复 release"));
        }
        let leases = self.storage.leases();
        if leases.is_empty() {
            return Ok(false);
        }
        // 单一持有者路径：先夺回内存再递减，保证池能复用底层块。
        if leases.iter().all(|lease| lease.refs() == 1) {
            let (storage, _, _) = self.take_storage();
            salvage_storage(storage);
            for lease in &leases {
                lease.release()?;
            }
            return Ok(true);
        }
        // 拆分兄弟可能已完成最终释放：此时本句柄不再欠任何计数，
        // 再次 release 属于重复释放。
        if leases.iter().all(|lease| !lease.is_allocated()) {
            let _ = self.take_storage();
            return Err(BufError::double_release(
                "租约已由其他持有者清算，重复 release",
            ));
        }
        // 组合缓冲的子租约可能因拆分兄弟而计数不一：每次 release 只
        // 递减仍存活的子租约，全部归零时整体进入终态。
        for lease in &leases {
            if lease.is_allocated() {
                lease.release()?;
            }
        }
        let fully_released = leases.iter().all(|lease| !lease.is_allocated());
        if fully_released {
            let _ = self.take_storage();
        }
        Ok(fully_released)
    }

    /// 构造租约观察探针，供泄漏诊断层在不持有缓冲的情况下查询状态。
    pub fn probe(&self) -> BufProbe {
        BufProbe {
            leases: self.storage.leases(),
        }
    }

    fn ensure_active(&self, op: &'static str) -> Result<()> {
        if matches!(self.storage, Storage::Released) {
            return Err(BufError::invalid_argument(format!(
                "缓冲已释放，无法执行 {op}"
            )));
        }
        Ok(())
    }

    fn take_storage(&mut self) -> (Storage, usize, usize) {
        let storage = mem::replace(&mut self.storage, Storage::Released);
        (storage, self.read_pos, self.write_pos)
    }
}

impl Drop for DataBuf {
    fn drop(&mut self) {
        // 未经释放即丢弃的句柄只暂存内存、不动计数：
        // 内存在计数最终归零时仍可复用，而遗漏的 release 保持可检测。
        let (storage, _, _) = self.take_storage();
        salvage_storage(storage);
    }
}

impl fmt::Debug for DataBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuf")
            .field("capacity", &self.capacity())
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// 租约观察探针：诊断层以此查询缓冲是否仍被持有。
///
/// 非池化缓冲产出的探针不含租约，视为“永不泄漏”。
pub struct BufProbe {
    leases: Vec<Arc<Lease>>,
}

impl BufProbe {
    /// 是否存在计数大于零的租约。
    pub fn is_allocated(&self) -> bool {
        self.leases.iter().any(|lease| lease.is_allocated())
    }

    /// 探针是否对应池化缓冲。
    pub fn is_pooled(&self) -> bool {
        !self.leases.is_empty()
    }
}

/// 将存储内的区段内存逐一暂存回各自租约。
fn salvage_storage(storage: Storage) {
    match storage {
        Storage::Simple(region) => salvage_region(region),
        Storage::Composite(regions) => {
            for region in regions {
                salvage_region(region);
            }
        }
        Storage::Released => {}
    }
}

fn salvage_region(region: Region) {
    if let Some(lease) = region.lease {
        lease.salvage(region.mem);
    }
}

/// 将 `regions` 中与 `[read, write)` 相交的部分零拷贝地追加到 `out`。
///
/// 不贡献字节但携带租约的区段以空区段形式保留，使其释放义务随
/// 组合缓冲延续。
fn append_trimmed(out: &mut Vec<Region>, regions: Vec<Region>, read: usize, write: usize) {
    let mut offset = 0;
    for mut region in regions {
        let len = region.len();
        let start = read.saturating_sub(offset).min(len);
        let end = write.saturating_sub(offset).min(len);
        offset += len;
        if end > start {
            let mut mem = region.mem.split_off(start);
            mem.truncate(end - start);
            out.push(Region {
                mem,
                lease: region.lease,
            });
        } else if region.lease.is_some() {
            region.mem.clear();
            out.push(region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 空缓冲的游标与派生量应自洽。
    #[test]
    fn fresh_buffer_reports_consistent_counters() {
        let buf = DataBuf::with_capacity(16);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.read_position(), 0);
        assert_eq!(buf.write_position(), 0);
        assert_eq!(buf.readable_byte_count(), 0);
        assert_eq!(buf.writable_byte_count(), 16);
        assert!(!buf.is_pooled());
        assert!(buf.is_allocated());
    }

    /// 包装外部内存应将内容视为已写入。
    #[test]
    fn wrap_marks_content_as_written() {
        let buf = DataBuf::wrap(BytesMut::from(&b"abc"[..]));
        assert_eq!(buf.capacity(), 3);
        assert_eq!(buf.readable_byte_count(), 3);
        assert_eq!(buf.byte_at(1).expect("随机读取应成功"), b'b');
    }

    /// 组合缓冲只保留各输入的可读区间。
    #[test]
    fn compose_carries_only_readable_spans() {
        let mut left = DataBuf::with_capacity(8);
        left.put_slice(b"xxab").expect("写入应成功");
        left.set_read_position(2).expect("跳过前缀应成功");
        let mut right = DataBuf::with_capacity(8);
        right.put_slice(b"cd").expect("写入应成功");
        let joined = DataBuf::compose(alloc::vec![left, right]).expect("拼接应成功");
        assert_eq!(joined.to_vec(), b"abcd");
        assert_eq!(joined.capacity(), 4, "已读前缀与未写尾部应被丢弃");
    }
}
