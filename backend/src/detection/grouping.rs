//! Merging of overlapping raw detections.
//!
//! Raw hits are clustered with a similar-rectangles predicate (transitively,
//! via union-find), each cluster is replaced by its averaged box, clusters
//! with too few members are dropped, and clusters nested inside a stronger
//! cluster are suppressed.

use super::Region;

pub const GROUP_EPS: f64 = 0.2;

pub fn group_regions(candidates: &[Region], min_neighbors: usize, eps: f64) -> Vec<Region> {
    if min_neighbors == 0 || candidates.is_empty() {
        return candidates.to_vec();
    }

    let labels = partition(candidates, eps);
    let n_classes = labels.iter().copied().max().map_or(0, |max| max + 1);

    let mut sums = vec![[0i64; 4]; n_classes];
    let mut counts = vec![0usize; n_classes];
    for (region, &label) in candidates.iter().zip(&labels) {
        let sum = &mut sums[label];
        sum[0] += i64::from(region.x);
        sum[1] += i64::from(region.y);
        sum[2] += i64::from(region.width);
        sum[3] += i64::from(region.height);
        counts[label] += 1;
    }

    let averaged: Vec<[i64; 4]> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &count)| {
            (*sum).map(|total| (total as f64 / count as f64).round_ties_even() as i64)
        })
        .collect();

    let mut grouped = Vec::new();
    for i in 0..n_classes {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let r1 = averaged[i];
        let nested = (0..n_classes).any(|j| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2[2] as f64 * eps).round_ties_even() as i64;
            let dy = (r2[3] as f64 * eps).round_ties_even() as i64;
            r1[0] >= r2[0] - dx
                && r1[1] >= r2[1] - dy
                && r1[0] + r1[2] <= r2[0] + r2[2] + dx
                && r1[1] + r1[3] <= r2[1] + r2[3] + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            grouped.push(Region::new(
                r1[0] as u32,
                r1[1] as u32,
                r1[2] as u32,
                r1[3] as u32,
            ));
        }
    }
    grouped
}

fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let (ax, ay, aw, ah) = (a.x as f64, a.y as f64, a.width as f64, a.height as f64);
    let (bx, by, bw, bh) = (b.x as f64, b.y as f64, b.width as f64, b.height as f64);
    (ax - bx).abs() <= delta
        && (ay - by).abs() <= delta
        && (ax + aw - bx - bw).abs() <= delta
        && (ay + ah - by - bh).abs() <= delta
}

/// Equivalence-class labels, numbered by first appearance.
fn partition(regions: &[Region], eps: f64) -> Vec<usize> {
    let n = regions.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in i + 1..n {
            if similar(&regions[i], &regions[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut label_of_root = vec![usize::MAX; n];
    let mut next = 0;
    (0..n)
        .map(|i| {
            let root = find(&mut parent, i);
            if label_of_root[root] == usize::MAX {
                label_of_root[root] = next;
                next += 1;
            }
            label_of_root[root]
        })
        .collect()
}
