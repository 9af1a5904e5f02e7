use skelly_types::Rotation;

/// Rotate a packed multi-channel image. `src` is `height` rows of `width`
/// pixels of `channels` bytes; `dst` must be the same length. Quarter turns
/// swap the output's row/column counts, which is why consumers use
/// `CameraConfig::effective_resolution`.
pub fn rotate_bgr(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    channels: usize,
    rotation: Rotation,
) {
    debug_assert_eq!(src.len(), width * height * channels);
    debug_assert_eq!(dst.len(), src.len());
    let px = channels;
    match rotation {
        Rotation::None => dst.copy_from_slice(src),
        Rotation::Rotate180 => {
            for row in 0..height {
                for col in 0..width {
                    let s = (row * width + col) * px;
                    let d = ((height - 1 - row) * width + (width - 1 - col)) * px;
                    dst[d..d + px].copy_from_slice(&src[s..s + px]);
                }
            }
        }
        Rotation::Clockwise90 => {
            // output is `width` rows of `height` pixels
            for row in 0..width {
                for col in 0..height {
                    let s = ((height - 1 - col) * width + row) * px;
                    let d = (row * height + col) * px;
                    dst[d..d + px].copy_from_slice(&src[s..s + px]);
                }
            }
        }
        Rotation::CounterClockwise90 => {
            for row in 0..width {
                for col in 0..height {
                    let s = (col * width + (width - 1 - row)) * px;
                    let d = (row * height + col) * px;
                    dst[d..d + px].copy_from_slice(&src[s..s + px]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x3 single-channel image:
    //   1 2 3
    //   4 5 6
    const SRC: [u8; 6] = [1, 2, 3, 4, 5, 6];

    #[test]
    fn rotate_none_copies() {
        let mut dst = [0u8; 6];
        rotate_bgr(&SRC, &mut dst, 3, 2, 1, Rotation::None);
        assert_eq!(dst, SRC);
    }

    #[test]
    fn rotate_180() {
        let mut dst = [0u8; 6];
        rotate_bgr(&SRC, &mut dst, 3, 2, 1, Rotation::Rotate180);
        assert_eq!(dst, [6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn rotate_clockwise_90() {
        let mut dst = [0u8; 6];
        rotate_bgr(&SRC, &mut dst, 3, 2, 1, Rotation::Clockwise90);
        // 3 rows of 2:
        //   4 1
        //   5 2
        //   6 3
        assert_eq!(dst, [4, 1, 5, 2, 6, 3]);
    }

    #[test]
    fn rotate_counter_clockwise_90() {
        let mut dst = [0u8; 6];
        rotate_bgr(&SRC, &mut dst, 3, 2, 1, Rotation::CounterClockwise90);
        //   3 6
        //   2 5
        //   1 4
        assert_eq!(dst, [3, 6, 2, 5, 1, 4]);
    }

    #[test]
    fn quarter_turns_compose_to_half_turn() {
        let mut once = [0u8; 6];
        let mut twice = [0u8; 6];
        rotate_bgr(&SRC, &mut once, 3, 2, 1, Rotation::Clockwise90);
        rotate_bgr(&once, &mut twice, 2, 3, 1, Rotation::Clockwise90);
        let mut half = [0u8; 6];
        rotate_bgr(&SRC, &mut half, 3, 2, 1, Rotation::Rotate180);
        assert_eq!(twice, half);
    }

    #[test]
    fn multi_channel_pixels_stay_packed() {
        // one row of two BGR pixels
        let src = [10, 11, 12, 20, 21, 22];
        let mut dst = [0u8; 6];
        rotate_bgr(&src, &mut dst, 2, 1, 3, Rotation::Rotate180);
        assert_eq!(dst, [20, 21, 22, 10, 11, 12]);
    }
}
