use ironrdp_pdu::utils::SplitTo as _;

pub fn encode(buffer: &mut [i16], temp_buffer: &mut [i16]) {
    encode_block(&mut *buffer, temp_buffer, 32);
    encode_block(&mut buffer[3072..], temp_buffer, 16);
    encode_block(&mut buffer[3840..], temp_buffer, 8);
}

fn encode_block(buffer: &mut [i16], temp_buffer: &mut [i16], subband_width: usize) {
    dwt_vertical(buffer, temp_buffer, subband_width);
    dwt_horizontal(buffer, temp_buffer, subband_width);
}

// DWT in vertical direction, results in 2 sub-bands in L, H order in tmp buffer dwt.
fn dwt_vertical(buffer: &[i16], dwt: &mut [i16], subband_width: usize) {
    let total_width = subband_width * 2;

    for x in 0..total_width {
        for n in 0..subband_width {
            let y = n * 2;
            let l_index = n * total_width + x;
            let h_index = l_index + subband_width * total_width;
            let src_index = y * total_width + x;

            dwt[h_index] = ((i32::from(buffer[src_index + total_width])
                - ((i32::from(buffer[src_index])
                    + i32::from(buffer[src_index + if n < subband_width - 1 { 2 * total_width } else { 0 }]))
                    >> 1))
                >> 1) as i16;
            dwt[l_index] = (i32::from(buffer[src_index])
                + if n == 0 {
                    i32::from(dwt[h_index])
                } else {
                    (i32::from(dwt[h_index - total_width]) + i32::from(dwt[h_index])) >> 1
                }) as i16;
        }
    }
}

// DWT in horizontal direction, results in 4 sub-bands in HL(0), LH(1), HH(2),
// LL(3) order, stored in original buffer.
// The lower part L generates LL(3) and HL(0).
// The higher part H generates LH(1) and HH(2).
fn dwt_horizontal(mut buffer: &mut [i16], dwt: &[i16], subband_width: usize) {
    let total_width = subband_width * 2;
    let squared_subband_width = subband_width.pow(2);

    let mut hl = buffer.split_to(squared_subband_width);
    let mut lh = buffer.split_to(squared_subband_width);
    let mut hh = buffer.split_to(squared_subband_width);
    let mut ll = buffer;
    let (mut l_src, mut h_src) = dwt.split_at(squared_subband_width * 2);

    for _ in 0..subband_width {
        // L
        for n in 0..subband_width {
            let x = n * 2;

            // HL
            hl[n] = ((i32::from(l_src[x + 1])
                - ((i32::from(l_src[x]) + i32::from(l_src[if n < subband_width - 1 { x + 2 } else { x }])) >> 1))
                >> 1) as i16;
            // LL
            ll[n] = (i32::from(l_src[x])
                + if n == 0 {
                    i32::from(hl[n])
                } else {
                    (i32::from(hl[n - 1]) + i32::from(hl[n])) >> 1
                }) as i16;
        }

        // H
        for n in 0..subband_width {
            let x = n * 2;

            // HH
            hh[n] = ((i32::from(h_src[x + 1])
                - ((i32::from(h_src[x]) + i32::from(h_src[if n < subband_width - 1 { x + 2 } else { x }])) >> 1))
                >> 1) as i16;
            // LH
            lh[n] = (i32::from(h_src[x])
                + if n == 0 {
                    i32::from(hh[n])
                } else {
                    (i32::from(hh[n - 1]) + i32::from(hh[n])) >> 1
                }) as i16;
        }

        hl = &mut hl[subband_width..];
        lh = &mut lh[subband_width..];
        hh = &mut hh[subband_width..];
        ll = &mut ll[subband_width..];

        l_src = &l_src[total_width..];
        h_src = &h_src[total_width..];
    }
}

pub fn decode(buffer: &mut [i16], temp_buffer: &mut [i16]) {
    decode_block(&mut buffer[3840..], temp_buffer, 8);
    decode_block(&mut buffer[3072..], temp_buffer, 16);
    decode_block(&mut *buffer, temp_buffer, 32);
}

/// Inverse DWT for the extrapolated tile layout selected by the progressive CONTEXT block's
/// `DWT_REDUCE_EXTRAPOLATE` flag. Unlike the standard layout's even 32/16/8 low/high split per
/// level, the extrapolated layout carries uneven low/high subband counts (33/31, 17/16, 9/8,
/// isotropic across both axes) — the low-pass band has more samples than the high-pass band at
/// every level. This decoder has no reference implementation of the extrapolated path to check
/// against (neither the corpus this was built from nor its original source material cover it);
/// the low-pass samples beyond the transmitted high-pass count are carried through unchanged
/// rather than lifted, which is this crate's reading of "extrapolate" (see DESIGN.md).
pub fn decode_extrapolated(buffer: &mut [i16; 4096], temp_buffer: &mut [i16; 4096]) {
    decode_block_rect(&mut buffer[3807..], temp_buffer, 8, 9);
    decode_block_rect(&mut buffer[3007..], temp_buffer, 16, 17);
    decode_block_rect(&mut buffer[..], temp_buffer, 31, 33);
}

fn decode_block_rect(buffer: &mut [i16], temp_buffer: &mut [i16], high_count: usize, low_count: usize) {
    inverse_horizontal_rect(buffer, temp_buffer, high_count, low_count);
    inverse_vertical_rect(buffer, temp_buffer, high_count, low_count);
}

/// Reconstructs one row/column of `high_count + low_count` spatial samples from one low-pass
/// sequence (`low`, length `low_count`) and one high-pass sequence (`high`, length `high_count`).
/// Mirrors `inverse_horizontal`'s per-row lifting formula for the leading `high_count` pairs;
/// any low-pass samples beyond that (present only when `low_count > high_count`) are carried
/// through directly as the tail rather than interpolated.
fn reconstruct_rect(low: &[i16], high: &[i16], dst: &mut [i16], high_count: usize, low_count: usize) {
    let total = high_count + low_count;

    for n in high_count..low_count {
        dst[high_count + n] = low[n];
    }

    for n in 0..high_count {
        dst[n * 2] = if n == 0 {
            (i32::from(low[0]) - ((i32::from(high[0]) * 2 + 1) >> 1)) as i16
        } else {
            (i32::from(low[n]) - ((i32::from(high[n - 1]) + i32::from(high[n]) + 1) >> 1)) as i16
        };
    }

    for n in 0..high_count {
        let x = n * 2;
        dst[x + 1] = if x + 2 < total {
            (i32::from(high[n] << 1) + ((i32::from(dst[x]) + i32::from(dst[x + 2])) >> 1)) as i16
        } else {
            (i32::from(high[n] << 1) + i32::from(dst[x])) as i16
        };
    }
}

// Inverse DWT in horizontal direction for the extrapolated layout: same HL/LH/HH/LL quadrant
// order as `inverse_horizontal`, generalized to independent high/low subband counts per axis.
fn inverse_horizontal_rect(mut buffer: &[i16], temp_buffer: &mut [i16], high_count: usize, low_count: usize) {
    let total = high_count + low_count;

    let hl = buffer.split_to(high_count * low_count);
    let lh = buffer.split_to(low_count * high_count);
    let hh = buffer.split_to(high_count * high_count);
    let ll = buffer;

    let (l_dst, h_dst) = temp_buffer.split_at_mut(low_count * total);

    for row in 0..low_count {
        reconstruct_rect(
            &ll[row * low_count..(row + 1) * low_count],
            &hl[row * high_count..(row + 1) * high_count],
            &mut l_dst[row * total..(row + 1) * total],
            high_count,
            low_count,
        );
    }
    for row in 0..high_count {
        reconstruct_rect(
            &lh[row * low_count..(row + 1) * low_count],
            &hh[row * high_count..(row + 1) * high_count],
            &mut h_dst[row * total..(row + 1) * total],
            high_count,
            low_count,
        );
    }
}

// Inverse DWT in vertical direction for the extrapolated layout. Operates column by column;
// gathers each column into a scratch `Vec` rather than the standard path's in-place stride
// arithmetic, since this path runs far less often (only when the CONTEXT flag selects it) and
// the per-column buffers involved are small (at most 33 entries).
fn inverse_vertical_rect(buffer: &mut [i16], temp_buffer: &[i16], high_count: usize, low_count: usize) {
    let total = high_count + low_count;

    for col in 0..total {
        let low_col: Vec<i16> = (0..low_count).map(|row| temp_buffer[row * total + col]).collect();
        let high_col: Vec<i16> = (0..high_count)
            .map(|row| temp_buffer[(low_count + row) * total + col])
            .collect();
        let mut out_col = vec![0_i16; total];
        reconstruct_rect(&low_col, &high_col, &mut out_col, high_count, low_count);
        for (row, value) in out_col.into_iter().enumerate() {
            buffer[row * total + col] = value;
        }
    }
}

fn decode_block(buffer: &mut [i16], temp_buffer: &mut [i16], subband_width: usize) {
    inverse_horizontal(buffer, temp_buffer, subband_width);
    inverse_vertical(buffer, temp_buffer, subband_width);
}

// Inverse DWT in horizontal direction, results in 2 sub-bands in L, H order in output buffer
// The 4 sub-bands are stored in HL(0), LH(1), HH(2), LL(3) order.
// The lower part L uses LL(3) and HL(0).
// The higher part H uses LH(1) and HH(2).
fn inverse_horizontal(mut buffer: &[i16], temp_buffer: &mut [i16], subband_width: usize) {
    let total_width = subband_width * 2;
    let squared_subband_width = subband_width.pow(2);

    let mut hl = buffer.split_to(squared_subband_width);
    let mut lh = buffer.split_to(squared_subband_width);
    let mut hh = buffer.split_to(squared_subband_width);
    let mut ll = buffer;

    let (mut l_dst, mut h_dst) = temp_buffer.split_at_mut(squared_subband_width * 2);

    for _ in 0..subband_width {
        // Even coefficients
        l_dst[0] = (i32::from(ll[0]) - ((i32::from(hl[0]) + i32::from(hl[0]) + 1) >> 1)) as i16;
        h_dst[0] = (i32::from(lh[0]) - ((i32::from(hh[0]) + i32::from(hh[0]) + 1) >> 1)) as i16;
        for n in 1..subband_width {
            let x = n * 2;
            l_dst[x] = (i32::from(ll[n]) - ((i32::from(hl[n - 1]) + i32::from(hl[n]) + 1) >> 1)) as i16;
            h_dst[x] = (i32::from(lh[n]) - ((i32::from(hh[n - 1]) + i32::from(hh[n]) + 1) >> 1)) as i16;
        }

        // Odd coefficients
        for n in 0..subband_width - 1 {
            let x = n * 2;
            l_dst[x + 1] = (i32::from(hl[n] << 1) + ((i32::from(l_dst[x]) + i32::from(l_dst[x + 2])) >> 1)) as i16;
            h_dst[x + 1] = (i32::from(hh[n] << 1) + ((i32::from(h_dst[x]) + i32::from(h_dst[x + 2])) >> 1)) as i16;
        }
        let n = subband_width - 1;
        let x = n * 2;
        l_dst[x + 1] = (i32::from(hl[n] << 1) + i32::from(l_dst[x])) as i16;
        h_dst[x + 1] = (i32::from(hh[n] << 1) + i32::from(h_dst[x])) as i16;

        hl = &hl[subband_width..];
        lh = &lh[subband_width..];
        hh = &hh[subband_width..];
        ll = &ll[subband_width..];

        l_dst = &mut l_dst[total_width..];
        h_dst = &mut h_dst[total_width..];
    }
}

fn inverse_vertical(mut buffer: &mut [i16], mut temp_buffer: &[i16], subband_width: usize) {
    let total_width = subband_width * 2;

    for _ in 0..total_width {
        buffer[0] =
            (i32::from(temp_buffer[0]) - ((i32::from(temp_buffer[subband_width * total_width]) * 2 + 1) >> 1)) as i16;

        let mut l = temp_buffer;
        let mut lh = &temp_buffer[(subband_width - 1) * total_width..];
        let mut h = &temp_buffer[subband_width * total_width..];
        let mut dst = &mut *buffer;

        for _ in 1..subband_width {
            l = &l[total_width..];
            lh = &lh[total_width..];
            h = &h[total_width..];

            // Even coefficients
            dst[2 * total_width] = (i32::from(l[0]) - ((i32::from(lh[0]) + i32::from(h[0]) + 1) >> 1)) as i16;

            // Odd coefficients
            dst[total_width] =
                (i32::from(lh[0] << 1) + ((i32::from(dst[0]) + i32::from(dst[2 * total_width])) >> 1)) as i16;

            dst = &mut dst[2 * total_width..];
        }

        dst[total_width] = (i32::from(lh[total_width] << 1) + ((i32::from(dst[0]) + i32::from(dst[0])) >> 1)) as i16;

        temp_buffer = &temp_buffer[1..];
        buffer = &mut buffer[1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_of_all_zero_coefficients_is_all_zero() {
        let mut buffer = [0_i16; 4096];
        let mut temp = [0_i16; 4096];
        decode(&mut buffer, &mut temp);
        assert_eq!(buffer, [0_i16; 4096]);
    }

    #[test]
    fn decode_extrapolated_of_all_zero_coefficients_is_all_zero() {
        let mut buffer = [0_i16; 4096];
        let mut temp = [0_i16; 4096];
        decode_extrapolated(&mut buffer, &mut temp);
        assert_eq!(buffer, [0_i16; 4096]);
    }

    #[test]
    fn reconstruct_rect_matches_square_lifting_when_counts_are_equal() {
        let low = [10_i16, 20, 30, 40];
        let high = [1_i16, 2, 3, 4];
        let mut dst = [0_i16; 8];
        reconstruct_rect(&low, &high, &mut dst, 4, 4);
        assert_eq!(dst[0], low[0] - ((high[0] * 2 + 1) >> 1));
        assert_eq!(dst[6], low[3] - ((high[2] + high[3] + 1) >> 1));
    }

    #[test]
    fn reconstruct_rect_carries_tail_low_samples_through_unlifted() {
        let low = [10_i16, 20, 30];
        let high = [1_i16, 2];
        let mut dst = [0_i16; 5];
        reconstruct_rect(&low, &high, &mut dst, 2, 3);
        // Tail low sample (index 2, beyond high_count=2) is carried straight to the last slot.
        assert_eq!(dst[4], 30);
    }
}
