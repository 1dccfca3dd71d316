use alloc::vec::Vec;

use super::storage::Storage;

/// 可读区间的零拷贝视图迭代器。
///
/// # 设计背景（Why）
/// - 传输层向 socket 写出时需要直接拿到底层内存切片，逐字节读取会
///   引入复制与调用开销；
/// - 视图借用缓冲本体（`&DataBuf`），借用期内缓冲无法被改写或释放，
///   “作用域化获取、所有退出路径自动归还”由借用检查器静态保证。
///
/// # 契约说明（What）
/// - 简单缓冲恰好产出一个视图；拼接缓冲按区段顺序各产出一个；
/// - 视图拼接后恰为 `[read, write)` 的可读字节，长度为零的区间不产出
///   视图；迭代耗尽后 `next` 返回 `None`。
pub struct ReadableViews<'a> {
    inner: alloc::vec::IntoIter<&'a [u8]>,
}

impl<'a> ReadableViews<'a> {
    pub(crate) fn new(storage: &'a Storage, read_pos: usize, write_pos: usize) -> Self {
        let mut slices = Vec::new();
        match storage {
            Storage::Simple(region) => {
                if write_pos > read_pos {
                    slices.push(&region.mem[read_pos..write_pos]);
                }
            }
            Storage::Composite(regions) => {
                let mut offset = 0;
                for region in regions {
                    let len = region.len();
                    let start = read_pos.saturating_sub(offset).min(len);
                    let end = write_pos.saturating_sub(offset).min(len);
                    if end > start {
                        slices.push(&region.mem[start..end]);
                    }
                    offset += len;
                }
            }
            Storage::Released => {}
        }
        Self {
            inner: slices.into_iter(),
        }
    }
}

impl<'a> Iterator for ReadableViews<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ReadableViews<'_> {}

/// 可写区间的零拷贝视图迭代器（出借式）。
///
/// # 设计背景（Why）
/// - 调用方经由视图直接写入 `[write, capacity)` 区间，随后调用
///   `advance_write` 宣告实际写入的字节数，新数据立即可读；
/// - 每次 `next` 返回的可变切片与本次调用的借用等长，同一时刻只存在
///   一个可变视图，避免别名冲突；因此本类型不实现 `Iterator`，而是
///   提供出借式的 `next`。
///
/// # 契约说明（What）
/// - 简单缓冲至多产出一个视图；拼接缓冲对写位置之后的每个区段各产出
///   一个；没有剩余可写空间时直接返回 `None`；
/// - 写入视图不移动游标——可见性由 `advance_write` 统一推进。
pub struct WritableViews<'a> {
    storage: &'a mut Storage,
    write_pos: usize,
    /// 下一个待考察区段的下标（拼接缓冲）。
    region_index: usize,
    /// 已越过区段的累计长度（拼接缓冲）。
    offset: usize,
    /// 简单缓冲的一次性产出标记。
    yielded: bool,
}

impl<'a> WritableViews<'a> {
    pub(crate) fn new(storage: &'a mut Storage, write_pos: usize) -> Self {
        Self {
            storage,
            write_pos,
            region_index: 0,
            offset: 0,
            yielded: false,
        }
    }

    /// 出借下一段可写内存；耗尽后返回 `None`。
    pub fn next(&mut self) -> Option<&mut [u8]> {
        match &mut *self.storage {
            Storage::Simple(region) => {
                if self.yielded || self.write_pos >= region.mem.len() {
                    return None;
                }
                self.yielded = true;
                Some(&mut region.mem[self.write_pos..])
            }
            Storage::Composite(regions) => {
                while self.region_index < regions.len() {
                    let len = regions[self.region_index].len();
                    let start = self.write_pos.saturating_sub(self.offset).min(len);
                    let index = self.region_index;
                    self.region_index += 1;
                    self.offset += len;
                    if start < len {
                        return Some(&mut regions[index].mem[start..]);
                    }
                }
                None
            }
            Storage::Released => None,
        }
    }
}
