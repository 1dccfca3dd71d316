//! 缓冲契约回归：游标语义、追加语义、结构操作与生命周期纪律。

use std::sync::Arc;
use std::sync::Mutex;

use bytes::BytesMut;
use ripple_core::{BufRecycler, DataBuf, ReclaimedBuf, TextEncoding, codes};

/// 测试用回收器：记录每次归还的容量与是否拿回了内存块。
struct RecordingRecycler {
    events: Mutex<Vec<(usize, bool)>>,
}

impl RecordingRecycler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<(usize, bool)> {
        self.events.lock().unwrap().clone()
    }
}

impl BufRecycler for RecordingRecycler {
    fn reclaim(&self, reclaimed: ReclaimedBuf) {
        let capacity = reclaimed.capacity();
        let had_memory = reclaimed.into_memory().is_some();
        self.events.lock().unwrap().push((capacity, had_memory));
    }
}

fn pooled_buf(capacity: usize, recycler: Arc<RecordingRecycler>) -> DataBuf {
    DataBuf::pooled(BytesMut::with_capacity(capacity), recycler)
}

/// 写入只追加：后续写入与扩容都不得改写已写入的字节。
#[test]
fn writes_are_append_only_across_growth() {
    let mut buf = DataBuf::with_capacity(4);
    buf.put_slice(b"ab").expect("写入应成功");
    let before: Vec<u8> = (0..2).map(|i| buf.byte_at(i).expect("随机读取应成功")).collect();

    buf.put_slice(b"cdefgh").expect("触发扩容的写入应成功");
    assert!(buf.capacity() >= 8, "容量应已增长");
    let after: Vec<u8> = (0..2).map(|i| buf.byte_at(i).expect("随机读取应成功")).collect();
    assert_eq!(before, after, "扩容不得改写已有内容");
    assert_eq!(buf.to_vec(), b"abcdefgh");
}

/// 顺序读取按写入顺序产出，耗尽后以 OutOfRange 拒绝。
#[test]
fn sequential_read_drains_in_order_then_rejects() {
    let mut buf = DataBuf::with_capacity(4);
    buf.put_u8(0x11).expect("写入应成功");
    buf.put_u8(0x22).expect("写入应成功");
    assert_eq!(buf.read_u8().expect("读取应成功"), 0x11);
    assert_eq!(buf.read_u8().expect("读取应成功"), 0x22);
    let err = buf.read_u8().expect_err("读尽后应报错");
    assert_eq!(err.code(), codes::OUT_OF_RANGE);
}

/// 游标越界写应逐项被拒绝，且缓冲状态保持不变。
#[test]
fn cursor_guards_reject_invalid_positions() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"abcd").expect("写入应成功");
    buf.set_read_position(2).expect("合法读位置应被接受");

    assert_eq!(
        buf.set_read_position(5).expect_err("读位置超过写位置应报错").code(),
        codes::OUT_OF_RANGE
    );
    assert_eq!(
        buf.set_write_position(1).expect_err("写位置低于读位置应报错").code(),
        codes::OUT_OF_RANGE
    );
    assert_eq!(
        buf.set_write_position(9).expect_err("写位置超出容量应报错").code(),
        codes::OUT_OF_RANGE
    );
    assert_eq!(buf.read_position(), 2);
    assert_eq!(buf.write_position(), 4);
}

/// 随机访问不移动游标，越界下标被拒绝。
#[test]
fn random_access_leaves_cursors_untouched() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"abcd").expect("写入应成功");
    assert_eq!(buf.byte_at(3).expect("随机读取应成功"), b'd');
    assert_eq!(buf.byte_at(4).expect_err("未写区间应拒绝").code(), codes::OUT_OF_RANGE);

    let mut dst = [0u8; 6];
    buf.copy_range_into(1, &mut dst, 2, 3).expect("区间复制应成功");
    assert_eq!(&dst, &[0, 0, b'b', b'c', b'd', 0]);
    assert!(buf.copy_range_into(2, &mut dst, 0, 3).is_err(), "越过写位置应拒绝");
    assert_eq!(buf.read_position(), 0, "随机访问不得移动读位置");
}

/// 查找在 [from, write) 内扫描，起点钳制到已写区间。
#[test]
fn search_clamps_to_written_span() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"abcb").expect("写入应成功");

    assert_eq!(buf.index_of(|b| b == b'c', 0), Some(2));
    assert_eq!(buf.index_of(|b| b == b'c', 3), None);
    assert_eq!(buf.index_of(|b| b == b'a', usize::MAX), None, "超大起点应为空扫描");
    assert_eq!(buf.last_index_of(|b| b == b'b', usize::MAX), Some(3));
    assert_eq!(buf.last_index_of(|b| b == b'b', 2), Some(1));
    assert_eq!(buf.last_index_of(|b| b == b'z', usize::MAX), None);
}

/// 拆分后两侧独立编号，拼接还原原始内容。
#[test]
fn split_then_compose_round_trips_content() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"abc").expect("写入应成功");

    let front = buf.split_to(1).expect("拆分应成功");
    assert_eq!(front.to_vec(), b"a");
    assert_eq!(front.capacity(), 1);
    assert_eq!(buf.to_vec(), b"bc");
    assert_eq!(buf.write_position(), 2, "剩余部分应从 0 重新编号");

    let joined = DataBuf::compose(vec![front, buf]).expect("拼接应成功");
    assert_eq!(joined.to_vec(), b"abc");
    assert_eq!(joined.readable_byte_count(), 3);
}

/// 拆分点钳制游标：拆分点落在已读区间内时前段游标取钳制值。
#[test]
fn split_clamps_cursors_into_front_range() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"abcdef").expect("写入应成功");
    buf.set_read_position(4).expect("读位置应被接受");

    let front = buf.split_to(2).expect("拆分应成功");
    assert_eq!(front.read_position(), 2, "前段读位置钳制到拆分点");
    assert_eq!(front.write_position(), 2);
    assert_eq!(buf.read_position(), 2, "剩余部分游标应整体左移");
    assert_eq!(buf.write_position(), 4);

    assert!(buf.split_to(buf.capacity() + 1).is_err(), "拆分点越界应拒绝");
}

/// 拼接缓冲的读写跨区段透明，视图按区段顺序产出。
#[test]
fn composite_reads_and_views_span_regions() {
    let mut left = DataBuf::with_capacity(4);
    left.put_slice(b"ab").expect("写入应成功");
    let mut right = DataBuf::with_capacity(4);
    right.put_slice(b"cd").expect("写入应成功");

    let mut joined = DataBuf::compose(vec![left, right]).expect("拼接应成功");
    let gathered: Vec<u8> = joined.readable_views().flatten().copied().collect();
    assert_eq!(gathered, b"abcd");
    assert_eq!(joined.byte_at(2).expect("跨区段随机读取应成功"), b'c');

    let mut out = [0u8; 3];
    joined.set_read_position(1).expect("读位置应被接受");
    joined.read_into(&mut out).expect("跨区段顺序读取应成功");
    assert_eq!(&out, b"bcd");
}

/// 写视图配合 advance_write 使数据立即可读。
#[test]
fn writable_views_with_advance_publish_bytes() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"ab").expect("写入应成功");
    {
        let mut views = buf.writable_views();
        let view = views.next().expect("应存在可写视图");
        view[0] = b'c';
        view[1] = b'd';
    }
    buf.advance_write(2).expect("宣告写入应成功");
    assert_eq!(buf.to_vec(), b"abcd");
}

/// 文本写入/读出按显式编码无损往返，扩容自动发生。
#[test]
fn text_round_trips_with_explicit_encoding() {
    let mut buf = DataBuf::with_capacity(5);
    buf.write_str("Ripple €", TextEncoding::Utf8).expect("UTF-8 写入应成功");
    assert_eq!(buf.write_position(), 10, "UTF-8 字节数应为 10");
    assert_eq!(buf.to_text(TextEncoding::Utf8).expect("解码应成功"), "Ripple €");

    assert_eq!(
        buf.to_text_range(0, 6, TextEncoding::Ascii).expect("ASCII 前缀解码应成功"),
        "Ripple"
    );
    assert!(
        buf.write_str("€", TextEncoding::Ascii).is_err(),
        "超出 ASCII 值域应拒绝"
    );
}

/// write_from 按块转写并同步推进源缓冲的读位置。
#[test]
fn write_from_transfers_and_advances_source() {
    let mut src = DataBuf::with_capacity(8);
    src.put_slice(b"abcdef").expect("写入应成功");
    src.set_read_position(1).expect("读位置应被接受");

    let mut dst = DataBuf::with_capacity(4);
    dst.write_from(&mut src, 3).expect("转写应成功");
    assert_eq!(dst.to_vec(), b"bcd");
    assert_eq!(src.read_position(), 4);
    assert!(dst.write_from(&mut src, 9).is_err(), "超过源可读量应拒绝");
}

/// 池化缓冲的引用计数阶梯：retain 后需等量 release，归零后再释放报 DoubleRelease。
#[test]
fn refcount_ladder_reaches_terminal_state() {
    let recycler = RecordingRecycler::new();
    let mut buf = pooled_buf(32, recycler.clone());
    assert!(buf.is_pooled());
    assert_eq!(buf.ref_count(), 1);

    buf.retain().expect("retain 应成功");
    assert_eq!(buf.ref_count(), 2);
    assert!(!buf.release().expect("仍有持有者，不应最终释放"));
    assert!(buf.release().expect("计数归零应最终释放"));
    assert!(!buf.is_allocated());

    let err = buf.release().expect_err("终态后再次 release 应报错");
    assert_eq!(err.code(), codes::DOUBLE_RELEASE);
    assert_eq!(recycler.events().len(), 1, "回收回调应恰好一次");
    assert!(buf.read_u8().is_err(), "终态后读取应被拒绝");
}

/// 拆分共享同一租约：两侧各自释放，最后一次才归还内存。
#[test]
fn split_shares_lease_until_both_release() {
    let recycler = RecordingRecycler::new();
    let mut buf = pooled_buf(32, recycler.clone());
    buf.put_slice(b"abcd").expect("写入应成功");

    let mut front = buf.split_to(2).expect("拆分应成功");
    assert_eq!(buf.ref_count(), 2, "拆分应使计数加一");

    assert!(!front.release().expect("先释放一侧不应归还"));
    assert!(recycler.events().is_empty());
    assert!(buf.release().expect("另一侧释放后应归还"));
    assert_eq!(recycler.events().len(), 1);
}

/// 拆分兄弟完成最终释放后，存活句柄既不能 retain 也不能再 release。
#[test]
fn sibling_final_release_terminates_shared_lease_for_live_handle() {
    let recycler = RecordingRecycler::new();
    let mut buf = pooled_buf(32, recycler.clone());
    buf.put_slice(b"abcd").expect("写入应成功");

    let mut front = buf.split_to(2).expect("拆分应成功");
    assert!(!front.release().expect("先释放一侧不应终结"));
    assert!(buf.release().expect("另一侧应完成最终释放"));

    assert!(!front.is_allocated(), "共享租约已归零");
    let retain_err = front.retain().expect_err("终结租约不得复活");
    assert_eq!(retain_err.code(), codes::INVALID_ARGUMENT);
    let release_err = front.release().expect_err("计数已被清算，重复 release 应报错");
    assert_eq!(release_err.code(), codes::DOUBLE_RELEASE);
    assert_eq!(recycler.events().len(), 1, "回收回调不得重复触发");
}

/// 非池化缓冲不参与计数：release 恒为非最终且缓冲保持可用。
#[test]
fn unpooled_buffer_ignores_refcounting() {
    let mut buf = DataBuf::with_capacity(8);
    buf.put_slice(b"ab").expect("写入应成功");
    assert!(!buf.is_pooled());
    assert_eq!(buf.ref_count(), 0);
    assert!(!buf.release().expect("非池化 release 应为无操作"));
    assert_eq!(buf.read_u8().expect("释放后仍可读取"), b'a');
}

/// 池化缓冲被直接丢弃时不递减计数，内存仍在最终释放时回到池侧。
#[test]
fn dropping_pooled_buffer_keeps_lease_observable() {
    let recycler = RecordingRecycler::new();
    let buf = pooled_buf(16, recycler.clone());
    let probe = buf.probe();
    drop(buf);

    assert!(probe.is_allocated(), "丢弃不等于释放，计数应保持");
    assert!(recycler.events().is_empty(), "未释放前不得回调池");
}
