//! 定长大端整数的读写
//!
//! 磁盘格式与宿主机字节序无关，所有多字节字段都按大端存储。

#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

#[inline]
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut bytes = [0; 2];
    bytes.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_be_bytes(bytes)
}

#[inline]
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_on_disk() {
        let mut buf = [0u8; 8];
        write_u32(&mut buf, 0, 0x0102_0304);
        write_u16(&mut buf, 4, 0xFFFF);
        write_u16(&mut buf, 6, 0x0A0B);

        assert_eq!(buf, [1, 2, 3, 4, 0xFF, 0xFF, 0x0A, 0x0B]);
        assert_eq!(read_u32(&buf, 0), 0x0102_0304);
        assert_eq!(read_u16(&buf, 4), 0xFFFF);
        assert_eq!(read_u16(&buf, 6), 0x0A0B);
    }
}
