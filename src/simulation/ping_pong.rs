/// Two equally sized buffers with swappable read/write roles.
///
/// A pass reads the read buffer and writes the write buffer, then `swap`
/// makes its output the input of the next pass. The capacity is fixed.
pub struct PingPongBuffer<T> {
    buffers: [Vec<T>; 2],
    read_index: usize,
}

impl<T: Clone> PingPongBuffer<T> {
    pub fn new(len: usize, init: T) -> Self {
        PingPongBuffer {
            buffers: [vec![init.clone(); len], vec![init; len]],
            read_index: 0,
        }
    }

    /// Both buffers start out as copies of `initial`.
    pub fn from_vec(initial: Vec<T>) -> Self {
        PingPongBuffer {
            buffers: [initial.clone(), initial],
            read_index: 0,
        }
    }
}

impl<T> PingPongBuffer<T> {
    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index (0 or 1) of the buffer that currently plays the read role.
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn read(&self) -> &[T] {
        &self.buffers[self.read_index]
    }

    pub fn write(&self) -> &[T] {
        &self.buffers[1 - self.read_index]
    }

    pub fn read_mut(&mut self) -> &mut [T] {
        &mut self.buffers[self.read_index]
    }

    pub fn write_mut(&mut self) -> &mut [T] {
        &mut self.buffers[1 - self.read_index]
    }

    /// Borrows the read buffer shared and the write buffer exclusively for one pass.
    pub fn read_write(&mut self) -> (&[T], &mut [T]) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.read_index == 0 {
            (first[0].as_slice(), second[0].as_mut_slice())
        } else {
            (second[0].as_slice(), first[0].as_mut_slice())
        }
    }

    /// Buffer `index` (0 or 1) regardless of its current role.
    pub fn buffer_mut(&mut self, index: usize) -> &mut [T] {
        &mut self.buffers[index]
    }

    pub fn swap(&mut self) {
        self.read_index = 1 - self.read_index;
    }
}

#[cfg(test)]
mod tests {
    use super::PingPongBuffer;

    #[test]
    fn swap_exchanges_roles_without_copying() {
        let mut buffer = PingPongBuffer::new(4, 0u32);
        let read_ptr = buffer.read().as_ptr();
        let write_ptr = buffer.write().as_ptr();

        buffer.swap();
        assert_eq!(buffer.read().as_ptr(), write_ptr);
        assert_eq!(buffer.write().as_ptr(), read_ptr);

        buffer.swap();
        assert_eq!(buffer.read().as_ptr(), read_ptr);
        assert_eq!(buffer.write().as_ptr(), write_ptr);
        assert_eq!(buffer.read_index(), 0);
    }

    #[test]
    fn pass_output_becomes_next_input() {
        let mut buffer = PingPongBuffer::from_vec(vec![1, 2, 3]);
        for _ in 0..3 {
            let (read, write) = buffer.read_write();
            for (w, r) in write.iter_mut().zip(read) {
                *w = r * 2;
            }
            buffer.swap();
        }
        assert_eq!(buffer.read(), &[8, 16, 24]);
        assert_eq!(buffer.len(), 3);
    }
}
