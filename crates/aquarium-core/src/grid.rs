//! Occupancy grid and flood fill used to detect when an organism has broken
//! into disconnected groups of cells.

/// A fixed-size occupancy grid over organism-local coordinates.
///
/// Each occupied slot carries an opaque payload (the caller's cell index).
/// Connectivity is 4-neighbour: diagonal contact does not join islands.
#[derive(Debug, Clone)]
pub struct CellGraph {
    width: usize,
    height: usize,
    slots: Vec<Option<usize>>,
}

impl CellGraph {
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            slots: vec![None; width * height],
        }
    }

    /// Marks a slot as occupied by the given payload. Out-of-window
    /// coordinates are ignored; a second write to the same slot wins.
    pub fn occupy(&mut self, x: usize, y: usize, payload: usize) {
        if x < self.width && y < self.height {
            self.slots[y * self.width + x] = Some(payload);
        }
    }

    fn at(&self, x: usize, y: usize) -> Option<usize> {
        self.slots[y * self.width + x]
    }

    /// Collects the payloads of each 4-connected island, in row-major
    /// discovery order.
    #[must_use]
    pub fn islands(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.width * self.height];
        let mut islands = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let index = y * self.width + x;
                if visited[index] || self.at(x, y).is_none() {
                    continue;
                }
                islands.push(self.flood(x, y, &mut visited));
            }
        }
        islands
    }

    fn flood(&self, x: usize, y: usize, visited: &mut [bool]) -> Vec<usize> {
        const NEIGHBOURS: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];

        let mut island = Vec::new();
        let mut stack = vec![(x, y)];
        visited[y * self.width + x] = true;
        while let Some((cx, cy)) = stack.pop() {
            if let Some(payload) = self.at(cx, cy) {
                island.push(payload);
            }
            for (dx, dy) in NEIGHBOURS {
                let nx = cx as isize + dx;
                let ny = cy as isize + dy;
                if nx < 0 || ny < 0 || nx as usize >= self.width || ny as usize >= self.height {
                    continue;
                }
                let (nx, ny) = (nx as usize, ny as usize);
                let index = ny * self.width + nx;
                if !visited[index] && self.at(nx, ny).is_some() {
                    visited[index] = true;
                    stack.push((nx, ny));
                }
            }
        }
        island
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_from_rows(rows: &[&[u8]]) -> CellGraph {
        let mut graph = CellGraph::new(rows[0].len(), rows.len());
        let mut payload = 0;
        for (y, row) in rows.iter().enumerate() {
            for (x, &occupied) in row.iter().enumerate() {
                if occupied == 1 {
                    graph.occupy(x, y, payload);
                    payload += 1;
                }
            }
        }
        graph
    }

    #[test]
    fn finds_islands_in_row_major_order() {
        let graph = graph_from_rows(&[
            &[1, 1, 0, 0, 0],
            &[1, 0, 0, 0, 0],
            &[0, 0, 1, 0, 0],
            &[1, 1, 0, 0, 0],
            &[0, 0, 0, 0, 1],
        ]);
        let islands = graph.islands();
        let sizes: Vec<usize> = islands.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 1, 2, 1]);
    }

    #[test]
    fn truncated_window_splits_islands() {
        // Same occupancy as above but the window stops at three rows, so
        // only the top-left corner and one stray cell remain.
        let graph = graph_from_rows(&[
            &[1, 1, 0, 0, 0],
            &[1, 0, 0, 0, 0],
            &[0, 0, 0, 0, 1],
        ]);
        let islands = graph.islands();
        let sizes: Vec<usize> = islands.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[test]
    fn diagonal_contact_does_not_connect() {
        let graph = graph_from_rows(&[&[1, 0], &[0, 1]]);
        assert_eq!(graph.islands().len(), 2);
    }

    #[test]
    fn empty_grid_has_no_islands() {
        let graph = CellGraph::new(11, 11);
        assert!(graph.islands().is_empty());
    }

    #[test]
    fn payloads_are_preserved() {
        let mut graph = CellGraph::new(3, 3);
        graph.occupy(0, 0, 7);
        graph.occupy(1, 0, 9);
        graph.occupy(2, 2, 4);
        let islands = graph.islands();
        assert_eq!(islands.len(), 2);
        let mut first = islands[0].clone();
        first.sort_unstable();
        assert_eq!(first, vec![7, 9]);
        assert_eq!(islands[1], vec![4]);
    }
}
