//! Matrix, statistics and learning primitives.
//!
//! A matrix at the language level is a list of equal-length arrays (one
//! per row); a vector is an array. The conversions at the boundary live
//! here together with the kernels themselves: Gauss-Jordan inverse,
//! elimination-based determinant/rank/solve, a Jacobi eigensolver backing
//! `pca`, Lloyd iteration for `kmeans`, and majority-vote `knn`.
//!
//! Shape mismatches raise the matrix-size error; singular systems raise a
//! kernel error with the operation named.

use rand::seq::SliceRandom;

use crate::env::Env;
use crate::value::{Value, EPSILON};
use crate::Error;

type Matrix = Vec<Vec<f64>>;

/// Read a language-level matrix: a non-empty list of equal-length arrays.
fn as_matrix(v: &Value) -> Result<Matrix, Error> {
    let rows = v.list_items()?;
    if rows.is_empty() {
        return Err(Error::invalid_matrix_size(v));
    }
    let mut m = Vec::with_capacity(rows.len());
    for row in &rows {
        m.push(row.array_items()?);
    }
    let width = m[0].len();
    if m.iter().any(|row| row.len() != width) {
        return Err(Error::invalid_matrix_size(v));
    }
    Ok(m)
}

fn matrix_value(m: Matrix) -> Value {
    Value::list(m.into_iter().map(Value::array).collect())
}

fn square(v: &Value) -> Result<Matrix, Error> {
    let m = as_matrix(v)?;
    if m.len() != m[0].len() {
        return Err(Error::invalid_matrix_size(v));
    }
    Ok(m)
}

fn identity(n: usize) -> Matrix {
    let mut m = vec![vec![0.0; n]; n];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

fn same_shape(a: &Matrix, b: &Matrix, node: &Value) -> Result<(), Error> {
    if a.len() != b.len() || a[0].len() != b[0].len() {
        return Err(Error::invalid_matrix_size(node));
    }
    Ok(())
}

pub(crate) fn fn_matdisp(args: &[Value], _env: &Env) -> Result<Value, Error> {
    for arg in args {
        let m = as_matrix(arg)?;
        let cells: Vec<Vec<String>> = m
            .iter()
            .map(|row| row.iter().map(|x| format!("{x:.4}")).collect())
            .collect();
        let width = cells
            .iter()
            .flatten()
            .map(String::len)
            .max()
            .unwrap_or(0);
        for row in &cells {
            for cell in row {
                print!("{cell:>width$} ");
            }
            println!();
        }
        println!();
    }
    Ok(Value::string(""))
}

pub(crate) fn fn_matmul(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut acc = as_matrix(&args[0])?;
    for arg in &args[1..] {
        let b = as_matrix(arg)?;
        if acc[0].len() != b.len() {
            return Err(Error::invalid_matrix_size(arg));
        }
        let mut out = vec![vec![0.0; b[0].len()]; acc.len()];
        for (i, out_row) in out.iter_mut().enumerate() {
            for (k, b_row) in b.iter().enumerate() {
                let a_ik = acc[i][k];
                for (j, cell) in out_row.iter_mut().enumerate() {
                    *cell += a_ik * b_row[j];
                }
            }
        }
        acc = out;
    }
    Ok(matrix_value(acc))
}

fn elementwise_mat(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Result<Value, Error> {
    let a = as_matrix(&args[0])?;
    let b = as_matrix(&args[1])?;
    same_shape(&a, &b, &args[1])?;
    let out = a
        .into_iter()
        .zip(b)
        .map(|(ra, rb)| ra.into_iter().zip(rb).map(|(x, y)| f(x, y)).collect())
        .collect();
    Ok(matrix_value(out))
}

pub(crate) fn fn_matadd(args: &[Value], _env: &Env) -> Result<Value, Error> {
    elementwise_mat(args, |x, y| x + y)
}

pub(crate) fn fn_matsub(args: &[Value], _env: &Env) -> Result<Value, Error> {
    elementwise_mat(args, |x, y| x - y)
}

pub(crate) fn fn_hadamard(args: &[Value], _env: &Env) -> Result<Value, Error> {
    elementwise_mat(args, |x, y| x * y)
}

pub(crate) fn fn_matsum(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let axis = args[1].number()?;
    let out = if axis == 0.0 {
        // column sums as a single row
        let mut sums = vec![0.0; m[0].len()];
        for row in &m {
            for (s, x) in sums.iter_mut().zip(row) {
                *s += x;
            }
        }
        vec![sums]
    } else {
        // row sums as a single column
        m.iter().map(|row| vec![row.iter().sum()]).collect()
    };
    Ok(matrix_value(out))
}

pub(crate) fn fn_rows(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::scalar(as_matrix(&args[0])?.len() as f64))
}

pub(crate) fn fn_cols(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::scalar(as_matrix(&args[0])?[0].len() as f64))
}

fn inclusive_range(from: &Value, to: &Value, bound: usize) -> Result<(usize, usize), Error> {
    let i = from.number()?;
    let j = to.number()?;
    if i < 0.0 || j < i || j as usize >= bound {
        return Err(Error::invalid_indexing(to));
    }
    Ok((i as usize, j as usize))
}

pub(crate) fn fn_getrows(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let (i, j) = inclusive_range(&args[1], &args[2], m.len())?;
    Ok(matrix_value(m[i..=j].to_vec()))
}

pub(crate) fn fn_getcols(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let (i, j) = inclusive_range(&args[1], &args[2], m[0].len())?;
    Ok(matrix_value(
        m.iter().map(|row| row[i..=j].to_vec()).collect(),
    ))
}

pub(crate) fn fn_transp(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let mut out = vec![vec![0.0; m.len()]; m[0].len()];
    for (i, row) in m.iter().enumerate() {
        for (j, x) in row.iter().enumerate() {
            out[j][i] = *x;
        }
    }
    Ok(matrix_value(out))
}

pub(crate) fn fn_eye(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let n = args[0].number()?;
    if n < 1.0 {
        return Err(Error::invalid_matrix_size(&args[0]));
    }
    Ok(matrix_value(identity(n as usize)))
}

pub(crate) fn fn_diag(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let d = args[0].array_items()?;
    let mut m = vec![vec![0.0; d.len()]; d.len()];
    for (i, x) in d.iter().enumerate() {
        m[i][i] = *x;
    }
    Ok(matrix_value(m))
}

/// Gauss-Jordan elimination against an identity augment.
fn invert(mut m: Matrix) -> Option<Matrix> {
    let n = m.len();
    let mut inv = identity(n);
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&a, &b| {
            m[a][col]
                .abs()
                .partial_cmp(&m[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if m[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot_row);
        inv.swap(col, pivot_row);
        let pivot = m[col][col];
        for x in m[col].iter_mut() {
            *x /= pivot;
        }
        for x in inv[col].iter_mut() {
            *x /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                m[row][k] -= factor * m[col][k];
                inv[row][k] -= factor * inv[col][k];
            }
        }
    }
    Some(inv)
}

pub(crate) fn fn_inv(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = square(&args[0])?;
    match invert(m) {
        Some(inv) => Ok(matrix_value(inv)),
        None => Err(Error::other("singular matrix").at(&args[0])),
    }
}

pub(crate) fn fn_det(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut m = square(&args[0])?;
    let n = m.len();
    let mut det = 1.0;
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if m[pivot_row][col].abs() < 1e-12 {
            return Ok(Value::scalar(0.0));
        }
        if pivot_row != col {
            m.swap(col, pivot_row);
            det = -det;
        }
        det *= m[col][col];
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
        }
    }
    Ok(Value::scalar(det))
}

pub(crate) fn fn_rank(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut m = as_matrix(&args[0])?;
    let (rows, cols) = (m.len(), m[0].len());
    let mut rank = 0;
    for col in 0..cols {
        if rank >= rows {
            break;
        }
        let pivot_row = (rank..rows).max_by(|&a, &b| {
            m[a][col]
                .abs()
                .partial_cmp(&m[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let Some(pivot_row) = pivot_row else { break };
        if m[pivot_row][col].abs() < 1e-9 {
            continue;
        }
        m.swap(rank, pivot_row);
        for row in rank + 1..rows {
            let factor = m[row][col] / m[rank][col];
            for k in col..cols {
                m[row][k] -= factor * m[rank][k];
            }
        }
        rank += 1;
    }
    Ok(Value::scalar(rank as f64))
}

pub(crate) fn fn_solve(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let a = square(&args[0])?;
    let b = args[1].array_items()?;
    let n = a.len();
    if b.len() != n {
        return Err(Error::invalid_matrix_size(&args[1]));
    }
    // eliminate on the augmented system
    let mut m: Matrix = a
        .into_iter()
        .zip(&b)
        .map(|(mut row, rhs)| {
            row.push(*rhs);
            row
        })
        .collect();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&x, &y| {
                m[x][col]
                    .abs()
                    .partial_cmp(&m[y][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if m[pivot_row][col].abs() < 1e-12 {
            return Err(Error::other("singular system").at(&args[0]));
        }
        m.swap(col, pivot_row);
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            for k in col..=n {
                m[row][k] -= factor * m[col][k];
            }
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = m[row][n];
        for k in row + 1..n {
            acc -= m[row][k] * x[k];
        }
        x[row] = acc / m[row][row];
    }
    Ok(Value::array(x))
}

pub(crate) fn fn_matcol(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let col = args[1].number()?;
    if col < 0.0 || col as usize >= m[0].len() {
        return Err(Error::invalid_indexing(&args[1]));
    }
    Ok(Value::array(m.iter().map(|row| row[col as usize]).collect()))
}

pub(crate) fn fn_stack2(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut a = as_matrix(&args[0])?;
    let b = as_matrix(&args[1])?;
    if a[0].len() != b[0].len() {
        return Err(Error::invalid_matrix_size(&args[1]));
    }
    a.extend(b);
    Ok(matrix_value(a))
}

fn column_means(m: &Matrix) -> Vec<f64> {
    let mut means = vec![0.0; m[0].len()];
    for row in m {
        for (s, x) in means.iter_mut().zip(row) {
            *s += x;
        }
    }
    let n = m.len() as f64;
    means.iter_mut().for_each(|s| *s /= n);
    means
}

fn column_stds(m: &Matrix, means: &[f64]) -> Vec<f64> {
    if m.len() < 2 {
        return vec![0.0; m[0].len()];
    }
    let mut vars = vec![0.0; m[0].len()];
    for row in m {
        for ((v, x), mean) in vars.iter_mut().zip(row).zip(means) {
            let d = x - mean;
            *v += d * d;
        }
    }
    let n = (m.len() - 1) as f64;
    vars.into_iter().map(|v| (v / n).sqrt()).collect()
}

pub(crate) fn fn_matmean(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    Ok(Value::array(column_means(&m)))
}

pub(crate) fn fn_matstd(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let means = column_means(&m);
    Ok(Value::array(column_stds(&m, &means)))
}

pub(crate) fn fn_zscore(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].array_items()?;
    let n = items.len() as f64;
    let mean = items.iter().sum::<f64>() / n;
    let var = items.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>()
        / if items.len() > 1 { n - 1.0 } else { 1.0 };
    let std = var.sqrt();
    if std == 0.0 {
        return Ok(Value::array(vec![0.0; items.len()]));
    }
    Ok(Value::array(
        items.into_iter().map(|x| (x - mean) / std).collect(),
    ))
}

/// Covariance of columns, rows as observations, normalized by n-1.
fn covariance(m: &Matrix) -> Matrix {
    let cols = m[0].len();
    let means = column_means(m);
    let denom = if m.len() > 1 { (m.len() - 1) as f64 } else { 1.0 };
    let mut cov = vec![vec![0.0; cols]; cols];
    for row in m {
        for i in 0..cols {
            let di = row[i] - means[i];
            for j in i..cols {
                cov[i][j] += di * (row[j] - means[j]);
            }
        }
    }
    for i in 0..cols {
        for j in i..cols {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

pub(crate) fn fn_cov(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    Ok(matrix_value(covariance(&m)))
}

pub(crate) fn fn_median(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].array_items()?;
    let k = args[1].number()?;
    if k < 1.0 || k as usize > items.len() || (k as usize) % 2 == 0 {
        return Err(Error::invalid_indexing(&args[1]));
    }
    let k = k as usize;
    let half = k / 2;
    let mut out = Vec::with_capacity(items.len());
    let mut window = Vec::with_capacity(k);
    for i in 0..items.len() {
        window.clear();
        for offset in 0..k {
            // window centered on i, zero-padded at the edges
            let at = i as isize - half as isize + offset as isize;
            if at < 0 || at as usize >= items.len() {
                window.push(0.0);
            } else {
                window.push(items[at as usize]);
            }
        }
        window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out.push(window[half]);
    }
    Ok(Value::array(out))
}

pub(crate) fn fn_linefit(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let x = args[0].array_items()?;
    let y = args[1].array_items()?;
    if x.len() != y.len() {
        return Err(Error::invalid_matrix_size(&args[1]));
    }
    let n = x.len() as f64;
    let sx: f64 = x.iter().sum();
    let sy: f64 = y.iter().sum();
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    let sxy: f64 = x.iter().zip(&y).map(|(a, b)| a * b).sum();
    let denom = n * sxx - sx * sx;
    if denom.abs() < 1e-12 {
        return Err(Error::other("cannot fit a vertical line").at(&args[0]));
    }
    let slope = (n * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / n;
    Ok(Value::array(vec![slope, intercept]))
}

/// Cyclic Jacobi rotations on a symmetric matrix. Returns the eigenvalues
/// and the matrix whose column c is the eigenvector for value c.
fn jacobi_eigen(mut a: Matrix) -> (Vec<f64>, Matrix) {
    let n = a.len();
    let mut v = identity(n);
    for _ in 0..100 {
        let mut off = 0.0;
        for p in 0..n {
            for q in p + 1..n {
                off += a[p][q] * a[p][q];
            }
        }
        if off.sqrt() < 1e-12 {
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                if a[p][q].abs() < 1e-15 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k][p];
                    let vkq = v[k][q];
                    v[k][p] = c * vkp - s * vkq;
                    v[k][q] = s * vkp + c * vkq;
                }
            }
        }
    }
    ((0..n).map(|i| a[i][i]).collect(), v)
}

/// Principal components of a rows-as-observations matrix: one row per
/// component (eigenvector plus its eigenvalue), strongest first.
pub(crate) fn fn_pca(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let cols = m[0].len();
    let (values, vectors) = jacobi_eigen(covariance(&m));
    let mut order: Vec<usize> = (0..cols).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut out = Vec::with_capacity(cols);
    for &c in &order {
        let mut row: Vec<f64> = (0..cols).map(|r| vectors[r][c]).collect();
        row.push(values[c]);
        out.push(row);
    }
    Ok(matrix_value(out))
}

fn distance2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub(crate) fn fn_kmeans(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let m = as_matrix(&args[0])?;
    let k = args[1].number()?;
    if k < 1.0 || k as usize > m.len() {
        return Err(Error::invalid_matrix_size(&args[1]));
    }
    let k = k as usize;

    // seed centroids with k distinct random observations
    let mut order: Vec<usize> = (0..m.len()).collect();
    order.shuffle(&mut rand::thread_rng());
    let mut centroids: Matrix = order[..k].iter().map(|&i| m[i].clone()).collect();
    let mut labels = vec![0usize; m.len()];

    for _ in 0..100 {
        for (label, row) in labels.iter_mut().zip(&m) {
            *label = (0..k)
                .min_by(|&a, &b| {
                    distance2(row, &centroids[a])
                        .partial_cmp(&distance2(row, &centroids[b]))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
        }
        let mut shift: f64 = 0.0;
        for c in 0..k {
            let members: Vec<&Vec<f64>> = labels
                .iter()
                .zip(&m)
                .filter(|(label, _)| **label == c)
                .map(|(_, row)| row)
                .collect();
            if members.is_empty() {
                continue; // empty cluster keeps its centroid
            }
            let mut next = vec![0.0; m[0].len()];
            for row in &members {
                for (s, x) in next.iter_mut().zip(row.iter()) {
                    *s += x;
                }
            }
            next.iter_mut().for_each(|s| *s /= members.len() as f64);
            shift = shift.max(distance2(&next, &centroids[c]).sqrt());
            centroids[c] = next;
        }
        if shift < 1e-5 {
            break;
        }
    }

    Ok(Value::list(vec![
        Value::array(labels.into_iter().map(|l| l as f64).collect()),
        matrix_value(centroids),
    ]))
}

/// Majority vote over the k nearest training rows for each query row.
pub(crate) fn fn_knn(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let train = as_matrix(&args[0])?;
    let labels = args[1].array_items()?;
    let query = as_matrix(&args[2])?;
    let k = args[3].number()?;
    if labels.len() != train.len() || query[0].len() != train[0].len() {
        return Err(Error::invalid_matrix_size(&args[1]));
    }
    if k < 1.0 || k as usize > train.len() {
        return Err(Error::invalid_indexing(&args[3]));
    }
    let k = k as usize;

    let mut out = Vec::with_capacity(query.len());
    for row in &query {
        let mut ranked: Vec<(f64, f64)> = train
            .iter()
            .zip(&labels)
            .map(|(t, label)| (distance2(row, t), *label))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut votes: Vec<(f64, usize)> = Vec::new();
        for (_, label) in &ranked[..k] {
            match votes.iter_mut().find(|(l, _)| (l - label).abs() < EPSILON) {
                Some((_, count)) => *count += 1,
                None => votes.push((*label, 1)),
            }
        }
        // ties go to the smallest label
        votes.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then(a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        });
        out.push(votes[0].0);
    }
    Ok(Value::array(out))
}
