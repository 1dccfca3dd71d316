use alloc::sync::Arc;
use alloc::vec::Vec;

use bytes::BytesMut;

use crate::lease::Lease;

/// 单个连续内存区段及其可选的池租约。
///
/// 不变量：`mem` 的全部字节均已初始化，`mem.len()` 即该区段贡献给
/// 缓冲的容量；未写入的尾部以零填充，避免任何未初始化内存暴露。
pub(crate) struct Region {
    pub(crate) mem: BytesMut,
    pub(crate) lease: Option<Arc<Lease>>,
}

impl Region {
    pub(crate) fn unpooled(mem: BytesMut) -> Self {
        Self { mem, lease: None }
    }

    pub(crate) fn len(&self) -> usize {
        self.mem.len()
    }
}

/// 缓冲的结构化存储变体。
///
/// # 设计背景（Why）
/// - 以带标签的变体取代“父类 + 虚函数覆盖”的继承结构：简单缓冲与
///   拼接缓冲的读写、定位、视图逻辑集中在同一处分派，游标不变量只需
///   在一个类型上校验；
/// - `Released` 作为终态显式存在，使“释放后再访问”成为可在每个操作
///   入口拦截的状态错误，而不是悬垂内存。
pub(crate) enum Storage {
    /// 单一连续区段。
    Simple(Region),
    /// 按序拼接的多个区段，读写按全局偏移跨区段定位。
    Composite(Vec<Region>),
    /// 终态：底层内存已交还，任何访问均为调用方错误。
    Released,
}

impl Storage {
    /// 当前可寻址的总容量。
    pub(crate) fn capacity(&self) -> usize {
        match self {
            Storage::Simple(region) => region.len(),
            Storage::Composite(regions) => regions.iter().map(Region::len).sum(),
            Storage::Released => 0,
        }
    }

    /// 读取绝对偏移处的单个字节；调用方保证 `pos < capacity`。
    pub(crate) fn byte_at(&self, pos: usize) -> u8 {
        match self {
            Storage::Simple(region) => region.mem[pos],
            Storage::Composite(regions) => {
                let (index, offset) = locate(regions, pos);
                regions[index].mem[offset]
            }
            Storage::Released => unreachable!("访问前已由状态守卫拦截"),
        }
    }

    /// 从绝对偏移 `pos` 起复制 `dst.len()` 字节；调用方保证范围合法。
    pub(crate) fn read_at(&self, pos: usize, dst: &mut [u8]) {
        match self {
            Storage::Simple(region) => {
                dst.copy_from_slice(&region.mem[pos..pos + dst.len()]);
            }
            Storage::Composite(regions) => {
                let (mut index, mut offset) = locate(regions, pos);
                let mut copied = 0;
                while copied < dst.len() {
                    let chunk = &regions[index].mem[offset..];
                    let step = chunk.len().min(dst.len() - copied);
                    dst[copied..copied + step].copy_from_slice(&chunk[..step]);
                    copied += step;
                    index += 1;
                    offset = 0;
                }
            }
            Storage::Released => unreachable!("访问前已由状态守卫拦截"),
        }
    }

    /// 从绝对偏移 `pos` 起写入 `src`；调用方保证范围落在容量之内。
    pub(crate) fn write_at(&mut self, pos: usize, src: &[u8]) {
        match self {
            Storage::Simple(region) => {
                region.mem[pos..pos + src.len()].copy_from_slice(src);
            }
            Storage::Composite(regions) => {
                let (mut index, mut offset) = locate(regions, pos);
                let mut written = 0;
                while written < src.len() {
                    let region = &mut regions[index];
                    let step = (region.mem.len() - offset).min(src.len() - written);
                    region.mem[offset..offset + step]
                        .copy_from_slice(&src[written..written + step]);
                    written += step;
                    index += 1;
                    offset = 0;
                }
            }
            Storage::Released => unreachable!("访问前已由状态守卫拦截"),
        }
    }

    /// 返回从绝对偏移 `pos` 起、不超过 `limit` 字节的最长连续切片。
    pub(crate) fn chunk_at(&self, pos: usize, limit: usize) -> &[u8] {
        match self {
            Storage::Simple(region) => {
                let end = region.len().min(pos + limit);
                &region.mem[pos..end]
            }
            Storage::Composite(regions) => {
                let (index, offset) = locate(regions, pos);
                let chunk = &regions[index].mem[offset..];
                &chunk[..chunk.len().min(limit)]
            }
            Storage::Released => unreachable!("访问前已由状态守卫拦截"),
        }
    }

    /// 将容量增长到 `target` 字节，新增部分零填充。
    ///
    /// 简单缓冲原地扩容并刷新租约容量；拼接缓冲以追加新的非池化
    /// 区段实现，避免搬移既有区段。
    pub(crate) fn grow_to(&mut self, target: usize) {
        let current = self.capacity();
        debug_assert!(target > current);
        match self {
            Storage::Simple(region) => {
                region.mem.resize(target, 0);
                if let Some(lease) = &region.lease {
                    lease.update_capacity(target);
                }
            }
            Storage::Composite(regions) => {
                let additional = target - current;
                let mut mem = BytesMut::with_capacity(additional);
                mem.resize(additional, 0);
                regions.push(Region::unpooled(mem));
            }
            Storage::Released => unreachable!("访问前已由状态守卫拦截"),
        }
    }

    /// 以零拷贝方式拆出前 `index` 字节的存储，共享区段保留各自租约。
    ///
    /// 被两侧共享的池租约在此处递增计数：拆分产生了新的逻辑持有者，
    /// 每一侧都欠一次 `release`。
    pub(crate) fn split_to(&mut self, index: usize) -> Storage {
        match self {
            Storage::Simple(region) => {
                let front_mem = region.mem.split_to(index);
                let lease = region.lease.clone();
                if let Some(lease) = &lease {
                    lease.retain_split();
                }
                Storage::Simple(Region {
                    mem: front_mem,
                    lease,
                })
            }
            Storage::Composite(regions) => {
                let mut front = Vec::new();
                let mut remaining = index;
                let mut rest = Vec::new();
                for mut region in regions.drain(..) {
                    if remaining == 0 {
                        rest.push(region);
                    } else if region.len() <= remaining {
                        remaining -= region.len();
                        front.push(region);
                    } else {
                        // 边界区段：两侧共享同一租约。
                        let front_mem = region.mem.split_to(remaining);
                        let lease = region.lease.clone();
                        if let Some(lease) = &lease {
                            lease.retain_split();
                        }
                        front.push(Region {
                            mem: front_mem,
                            lease,
                        });
                        remaining = 0;
                        rest.push(region);
                    }
                }
                *regions = rest;
                Storage::Composite(front)
            }
            Storage::Released => unreachable!("访问前已由状态守卫拦截"),
        }
    }

    /// 汇集全部区段的租约句柄。
    pub(crate) fn leases(&self) -> Vec<Arc<Lease>> {
        match self {
            Storage::Simple(region) => region.lease.iter().cloned().collect(),
            Storage::Composite(regions) => regions
                .iter()
                .filter_map(|region| region.lease.clone())
                .collect(),
            Storage::Released => Vec::new(),
        }
    }
}

/// 定位绝对偏移 `pos` 所在的区段下标与区段内偏移。
///
/// 调用方保证 `pos` 小于区段长度之和；落在区段边界时返回下一个
/// 非空区段的起点。
fn locate(regions: &[Region], pos: usize) -> (usize, usize) {
    let mut offset = pos;
    for (index, region) in regions.iter().enumerate() {
        if offset < region.len() {
            return (index, offset);
        }
        offset -= region.len();
    }
    unreachable!("偏移超出区段总长，应已被游标校验拦截")
}
