//! Tiling of a raster into blocks.

use crate::native::{RasterSize, Window};

/// Row-major tiling of a raster into blocks of a fixed size.
///
/// Edge blocks are clipped, so the windows cover every element exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPlan {
    size: RasterSize,
    block: RasterSize,
}

impl BlockPlan {
    /// Plans blocks of `block` over `size`. Zero block edges are treated as 1.
    pub fn new(size: RasterSize, block: RasterSize) -> Self {
        Self {
            size,
            block: RasterSize::new(block.x.max(1), block.y.max(1)),
        }
    }

    pub fn size(&self) -> RasterSize {
        self.size
    }

    pub fn block(&self) -> RasterSize {
        self.block
    }

    pub fn blocks_x(&self) -> usize {
        self.size.x.div_ceil(self.block.x)
    }

    pub fn blocks_y(&self) -> usize {
        self.size.y.div_ceil(self.block.y)
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.blocks_x() * self.blocks_y()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Window of the `index`-th block in row-major order.
    pub fn window(&self, index: usize) -> Option<Window> {
        if index >= self.len() {
            return None;
        }
        let (bx, by) = (index % self.blocks_x(), index / self.blocks_x());
        let (x_off, y_off) = (bx * self.block.x, by * self.block.y);
        Some(Window::new(
            x_off,
            y_off,
            self.block.x.min(self.size.x - x_off),
            self.block.y.min(self.size.y - y_off),
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = Window> + '_ {
        (0..self.len()).filter_map(move |i| self.window(i))
    }
}
